//! Per-slave-id translator hooks (spec §4.4): rewrite a PDU in-flight, or
//! answer it locally from a shadow register model without touching the bus.

mod emulator;
mod relay_shim;

pub use emulator::Emulator;
pub use relay_shim::RelayShim;

use std::collections::HashMap;
use std::sync::Arc;

use crate::modbus::Pdu;

/// A per-slave-id hook. `translate` may mutate `pdu` in place; if it returns
/// `true` the (now-mutated) PDU is the final reply and never reaches the bus.
pub trait Translator: Send + Sync {
    fn translate(&self, pdu: &mut Pdu) -> bool;
}

/// Read-only after startup: maps slave id to its translator. Each
/// translator serialises its own state internally (spec §4.4, §9) — there is
/// no lock here, and distinct slave ids proceed concurrently.
#[derive(Default, Clone)]
pub struct Registry {
    translators: HashMap<u8, Arc<dyn Translator>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, slave_id: u8, translator: Arc<dyn Translator>) {
        self.translators.insert(slave_id, translator);
    }

    /// Runs the translator for `pdu.slave_id`, if any. Returns `true` when the
    /// (possibly mutated) PDU already is the final reply.
    pub fn apply(&self, pdu: &mut Pdu) -> bool {
        match self.translators.get(&pdu.slave_id) {
            Some(translator) => translator.translate(pdu),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysShortCircuit;
    impl Translator for AlwaysShortCircuit {
        fn translate(&self, pdu: &mut Pdu) -> bool {
            pdu.data = vec![0xAA];
            true
        }
    }

    #[test]
    fn unregistered_slave_passes_through() {
        let registry = Registry::new();
        let mut pdu = Pdu::read_holding_registers(9, 0, 1);
        let original = pdu.clone();
        assert!(!registry.apply(&mut pdu));
        assert_eq!(pdu, original);
    }

    #[test]
    fn registered_slave_runs_its_translator() {
        let mut registry = Registry::new();
        registry.register(9, Arc::new(AlwaysShortCircuit));
        let mut pdu = Pdu::read_holding_registers(9, 0, 1);
        assert!(registry.apply(&mut pdu));
        assert_eq!(pdu.data, vec![0xAA]);
    }
}

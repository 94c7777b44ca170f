//! RAII guard pairing one admission with exactly one release, mirroring the capacity/KV
//! reservation pattern a paged-cache manager would use: acquired once by the arbiter, the guard
//! travels with the request and releases on drop regardless of how the worker's processing path
//! exits (success, generation error, or panic unwind).

use std::sync::Arc;

use crate::capacity::CapacityAccountant;
use crate::lora::LoraRegistry;

pub struct AdmissionGuard {
    accountant: Arc<CapacityAccountant>,
    lora: Arc<LoraRegistry>,
    charge: i64,
    lora_name: Option<String>,
}

impl AdmissionGuard {
    pub fn new(accountant: Arc<CapacityAccountant>, lora: Arc<LoraRegistry>, charge: i64) -> Self {
        Self {
            accountant,
            lora,
            charge,
            lora_name: None,
        }
    }

    pub fn charge(&self) -> i64 {
        self.charge
    }

    /// Bumps the LoRA running count and remembers the name so `Drop` decrefs it exactly once.
    pub fn attach_lora(&mut self, name: String) {
        self.lora.incref(&name);
        self.lora_name = Some(name);
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.accountant.release(self.charge);
        if let Some(name) = &self.lora_name {
            self.lora.decref(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_releases_capacity_and_lora() {
        let accountant = Arc::new(CapacityAccountant::new(4, 0));
        let lora = Arc::new(LoraRegistry::new(["adapter-a".to_string()]));
        accountant.acquire(12);
        {
            let mut guard = AdmissionGuard::new(accountant.clone(), lora.clone(), 12);
            guard.attach_lora("adapter-a".to_string());
            assert_eq!(lora.running_count("adapter-a"), 1);
        }
        assert_eq!(accountant.running(), 0);
        assert_eq!(accountant.processing_tokens(), 0);
        assert_eq!(lora.running_count("adapter-a"), 0);
    }
}

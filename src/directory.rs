use crate::{backend::ProviderDirectory, types::Provider};

const PROVIDERS: [(i64, &str, &str); 4] = [
    (1, "Dr. John Smith", "Cardiology"),
    (2, "Dr. Sarah Johnson", "Dermatology"),
    (3, "Dr. Michael Chang", "Orthopedics"),
    (4, "Dr. Emily Rodriguez", "Pediatrics"),
];

/// Fixed provider list served without any freshness guarantees.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory;

impl ProviderDirectory for StaticDirectory {
    fn providers(&self) -> Vec<Provider> {
        PROVIDERS
            .iter()
            .map(|&(id, name, specialty)| Provider {
                id,
                name: name.into(),
                specialty: specialty.into(),
            })
            .collect()
    }
}

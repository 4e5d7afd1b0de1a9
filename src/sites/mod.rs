mod homes;
pub mod html;
mod suumo;

pub use homes::HomesAdapter;
pub use suumo::SuumoAdapter;

use crate::adapter::AdapterRegistry;

/// Registry with every built-in site
pub fn default_registry() -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    registry.register(Box::new(HomesAdapter::new()));
    registry.register(Box::new(SuumoAdapter::new()));
    registry
}

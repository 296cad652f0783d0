//! Image generation providers.

pub mod bfl;
pub mod stability;

pub use bfl::{BflModel, BflProvider, BflProviderBuilder, JobStatus};
pub use stability::{StabilityModel, StabilityProvider, StabilityProviderBuilder};

use crate::image::normalize::ProviderSpec;
use crate::image::types::ProviderKind;

/// Returns the accepted parameters of a provider.
pub fn spec_for(kind: ProviderKind) -> ProviderSpec {
    match kind {
        ProviderKind::Stability => stability::SPEC,
        ProviderKind::Bfl => bfl::SPEC,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_for_matches_kind() {
        for kind in ProviderKind::ALL {
            let spec = spec_for(kind);
            assert_eq!(spec.kind, kind);
            assert!(spec.models.contains(&spec.default_model));
        }
    }

    #[test]
    fn test_only_stability_honors_optional_parameters() {
        assert!(spec_for(ProviderKind::Stability).supports_seed);
        assert!(!spec_for(ProviderKind::Bfl).supports_seed);
        assert!(!spec_for(ProviderKind::Bfl).supports_negative_prompt);
    }
}

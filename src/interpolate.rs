//! Named resampling kernels.

use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::runtime::Runtime;
use image::imageops::FilterType;
use std::fmt;

/// A registry-validated interpolator, passed to operations as a
/// [`Kind::Interpolator`](crate::Kind::Interpolator) argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interpolator {
    name: &'static str,
    filter: FilterType,
}

impl Interpolator {
    /// Look up a registered interpolator by name.
    pub fn new(runtime: &Runtime, name: &str) -> Result<Self> {
        runtime.ensure_running()?;
        Self::from_registry(runtime.registry(), name)
    }

    pub(crate) fn from_registry(registry: &Registry, name: &str) -> Result<Self> {
        registry
            .interpolator(name)
            .map(|(name, filter)| Self { name, filter })
            .ok_or_else(|| Error::InvalidInterpolator(name.to_string()))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn filter(&self) -> FilterType {
        self.filter
    }

    /// Point sampling, no blending between neighbours.
    pub fn is_nearest(&self) -> bool {
        self.filter == FilterType::Nearest
    }
}

impl fmt::Display for Interpolator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;

    #[test]
    fn known_names_resolve() {
        let runtime = Runtime::startup(RuntimeConfig::default()).unwrap();
        let nearest = Interpolator::new(&runtime, "nearest").unwrap();
        assert!(nearest.is_nearest());
        let bicubic = Interpolator::new(&runtime, "bicubic").unwrap();
        assert_eq!(bicubic.filter(), FilterType::CatmullRom);
        assert_eq!(bicubic.to_string(), "bicubic");
    }

    #[test]
    fn unknown_name_is_invalid_interpolator() {
        let runtime = Runtime::startup(RuntimeConfig::default()).unwrap();
        assert!(matches!(
            Interpolator::new(&runtime, "vsqbs"),
            Err(Error::InvalidInterpolator(name)) if name == "vsqbs"
        ));
    }
}

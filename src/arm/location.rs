//! Azure region names.

/// Normalize a region name: lowercase with spaces removed (`West Europe` -> `westeurope`).
pub fn normalize(location: &str) -> String {
    location.replace(' ', "").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("West Europe"), "westeurope");
        assert_eq!(normalize("westeurope"), "westeurope");
        assert_eq!(normalize("East US 2"), "eastus2");
        assert_eq!(normalize(""), "");
    }
}

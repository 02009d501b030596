//! Geo pricing tiers for gift-card store items.
//!
//! Country codes come from an upstream geo-IP lookup and are untrusted:
//! anything missing or unrecognised lands in tier 3, the most expensive.

/// Countries priced at the base price.
const TIER_1: &[&str] = &[
    "US", "CA", "GB", "AU", "NZ", "IE", "DE", "FR", "NL", "BE", "LU", "AT", "CH", "SE", "NO",
    "DK", "FI", "IS",
];

/// Countries priced at 1.5x.
const TIER_2: &[&str] = &[
    "KR", "JP", "SG", "HK", "TW", "IL", "AE", "QA", "SA", "KW", "ES", "IT", "PT", "GR", "CY",
    "MT", "SI", "CZ", "EE", "PL",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PricingTier {
    Tier1,
    Tier2,
    Tier3,
}

impl PricingTier {
    pub fn number(&self) -> u8 {
        match self {
            Self::Tier1 => 1,
            Self::Tier2 => 2,
            Self::Tier3 => 3,
        }
    }

    pub fn multiplier(&self) -> f64 {
        match self {
            Self::Tier1 => 1.0,
            Self::Tier2 => 1.5,
            Self::Tier3 => 3.0,
        }
    }
}

/// Resolve a (possibly absent) ISO 3166 alpha-2 code to its tier.
pub fn tier_for(country_code: Option<&str>) -> PricingTier {
    let Some(code) = country_code else {
        return PricingTier::Tier3;
    };
    let code = code.trim().to_ascii_uppercase();
    if TIER_1.contains(&code.as_str()) {
        PricingTier::Tier1
    } else if TIER_2.contains(&code.as_str()) {
        PricingTier::Tier2
    } else {
        PricingTier::Tier3
    }
}

/// `round(base_price * multiplier)` for the caller's country.
pub fn adjusted_price(base_price: i64, country_code: Option<&str>) -> i64 {
    (base_price as f64 * tier_for(country_code).multiplier()).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_1_pays_base_price() {
        assert_eq!(adjusted_price(5000, Some("US")), 5000);
        assert_eq!(adjusted_price(5000, Some("gb")), 5000);
    }

    #[test]
    fn test_tier_2_pays_one_and_a_half() {
        assert_eq!(adjusted_price(5000, Some("KR")), 7500);
        assert_eq!(adjusted_price(333, Some("JP")), 500);
    }

    #[test]
    fn test_missing_country_is_most_conservative() {
        assert_eq!(adjusted_price(5000, None), 15000);
        assert_eq!(tier_for(None), PricingTier::Tier3);
    }

    #[test]
    fn test_unknown_or_garbage_country_is_tier_3() {
        assert_eq!(tier_for(Some("ZZ")), PricingTier::Tier3);
        assert_eq!(tier_for(Some("")), PricingTier::Tier3);
        assert_eq!(tier_for(Some("united states")), PricingTier::Tier3);
        assert_eq!(adjusted_price(5000, Some("IN")), 15000);
    }

    #[test]
    fn test_whitespace_is_trimmed() {
        assert_eq!(tier_for(Some(" kr ")).number(), 2);
    }
}

//! Unit conversion utilities for geodynamic simulations
//!
//! Constants and conversion helpers for the units that appear in crustal
//! thermal modeling, eliminating magic numbers throughout the codebase.

// ============================================================================
// Time
// ============================================================================

/// Seconds per year (365.25 days accounting for leap years)
pub const SECONDS_PER_YEAR: f64 = 365.25 * 24.0 * 3600.0;

/// Seconds per million years
pub const SECONDS_PER_MYR: f64 = SECONDS_PER_YEAR * 1e6;

/// Seconds per thousand years (kiloyear)
pub const SECONDS_PER_KYR: f64 = SECONDS_PER_YEAR * 1e3;

/// Convert years to seconds
#[inline]
pub fn years_to_seconds(years: f64) -> f64 {
    years * SECONDS_PER_YEAR
}

/// Convert seconds to years
#[inline]
pub fn seconds_to_years(seconds: f64) -> f64 {
    seconds / SECONDS_PER_YEAR
}

/// Convert million years to seconds
#[inline]
pub fn myr_to_seconds(myr: f64) -> f64 {
    myr * SECONDS_PER_MYR
}

/// Convert seconds to million years
#[inline]
pub fn seconds_to_myr(seconds: f64) -> f64 {
    seconds / SECONDS_PER_MYR
}

// ============================================================================
// Velocity
// ============================================================================

/// Convert cm/yr (the customary plate-rate unit) to m/s
#[inline]
pub fn cm_per_year_to_m_per_s(cm_per_year: f64) -> f64 {
    cm_per_year * 1e-2 / SECONDS_PER_YEAR
}

/// Convert m/s to cm/yr
#[inline]
pub fn m_per_s_to_cm_per_year(m_per_s: f64) -> f64 {
    m_per_s * 1e2 * SECONDS_PER_YEAR
}

// ============================================================================
// Pressure
// ============================================================================

/// Pascals to megapascals conversion factor
pub const PA_TO_MPA: f64 = 1e-6;

/// Megapascals to pascals conversion factor
pub const MPA_TO_PA: f64 = 1e6;

/// Pascals to gigapascals conversion factor
pub const PA_TO_GPA: f64 = 1e-9;

// ============================================================================
// Heat
// ============================================================================

/// Microwatts per cubic meter to W/m³ (radiogenic heat production)
pub const UW_PER_M3_TO_W_PER_M3: f64 = 1e-6;

/// Milliwatts per square meter to W/m² (surface/basal heat flux)
pub const MW_PER_M2_TO_W_PER_M2: f64 = 1e-3;

// ============================================================================
// Temperature
// ============================================================================

/// 0 °C in kelvin
pub const CELSIUS_TO_KELVIN_OFFSET: f64 = 273.15;

/// Universal gas constant (J/(mol·K)), used by dislocation-creep laws
pub const GAS_CONSTANT: f64 = 8.314_462_618;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_time_roundtrip() {
        assert_relative_eq!(seconds_to_years(years_to_seconds(1234.5)), 1234.5);
        assert_relative_eq!(seconds_to_myr(myr_to_seconds(7.0)), 7.0);
    }

    #[test]
    fn test_plate_rate_conversion() {
        // 1 cm/yr is roughly 3.17e-10 m/s
        let v = cm_per_year_to_m_per_s(1.0);
        assert_relative_eq!(v, 3.168_8e-10, epsilon = 1e-13);
        assert_relative_eq!(m_per_s_to_cm_per_year(v), 1.0, epsilon = 1e-12);
    }
}

//! Color-science helpers for the white balance algorithms.

use isp3a_hw::ColorConversion;

/// Exponent undoing the 1/2.2 output gamma.
pub const GAMMA: f32 = 2.2;

/// sRGB to XYZ matrix (D65)
const SRGB_TO_XYZ: [[f64; 3]; 3] = [
    [0.4124564, 0.3575761, 0.1804375],
    [0.2126729, 0.7151522, 0.0721750],
    [0.0193339, 0.1191920, 0.9503041],
];

/// McCamy epicenter in CIE 1931 xy.
const MCCAMY_XE: f64 = 0.3320;
const MCCAMY_YE: f64 = 0.1858;

/// Run RGB (0-255) through a color conversion matrix, clamping the result
/// to the 8-bit range. A disabled matrix passes values through.
pub fn apply_ccm(ccm: &ColorConversion, rgb: [f32; 3]) -> [f32; 3] {
    if !ccm.enable {
        return rgb.map(|v| v.clamp(0.0, 255.0));
    }
    let mut out = [0.0f32; 3];
    for (o, (row, offset)) in out.iter_mut().zip(ccm.coeff.iter().zip(ccm.offset)) {
        let v = row[0] * rgb[0] + row[1] * rgb[1] + row[2] * rgb[2] + offset;
        *o = v.clamp(0.0, 255.0);
    }
    out
}

/// Gamma-encoded 8-bit value back to linear light, still on a 0-255 scale.
#[inline]
pub fn inverse_gamma(v: f32) -> f32 {
    255.0 * (v.clamp(0.0, 255.0) / 255.0).powf(GAMMA)
}

/// sRGB transfer function inverse, `v` normalised to [0, 1].
#[inline]
pub fn srgb_to_linear(v: f64) -> f64 {
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

#[inline]
fn linear_rgb_to_xyz(rgb: [f64; 3]) -> [f64; 3] {
    SRGB_TO_XYZ.map(|row| row[0] * rgb[0] + row[1] * rgb[1] + row[2] * rgb[2])
}

/// CIE 1931 chromaticity of a linear RGB triple; `None` for black.
pub fn xy_chromaticity(linear_rgb: [f64; 3]) -> Option<(f64, f64)> {
    let [x, y, z] = linear_rgb_to_xyz(linear_rgb);
    let sum = x + y + z;
    if sum <= f64::EPSILON {
        return None;
    }
    Some((x / sum, y / sum))
}

/// McCamy's cubic approximation of correlated color temperature.
pub fn mccamy_cct(x: f64, y: f64) -> f64 {
    let n = (x - MCCAMY_XE) / (MCCAMY_YE - y);
    449.0 * n.powi(3) + 3525.0 * n.powi(2) + 6823.3 * n + 5520.33
}

/// Empirical `a*t^2 + b*t + c` fit of the McCamy estimate to the reference
/// sensor.
#[inline]
pub fn correct_cct(cct: f64, [a, b, c]: [f64; 3]) -> f64 {
    a * cct * cct + b * cct + c
}

/// Gain-free 8-bit RGB to corrected CCT in Kelvin.
pub fn estimate_cct(rgb: [f64; 3], correction: [f64; 3]) -> Option<f64> {
    let linear = rgb.map(|v| srgb_to_linear((v / 255.0).clamp(0.0, 1.0)));
    let (x, y) = xy_chromaticity(linear)?;
    let cct = correct_cct(mccamy_cct(x, y), correction);
    cct.is_finite().then_some(cct)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORRECTION: [f64; 3] = [1.9e-5, 0.76, 763.0];

    #[test]
    fn test_identity_ccm_clamps() {
        let ccm = ColorConversion { enable: true, ..ColorConversion::IDENTITY };
        assert_eq!(apply_ccm(&ccm, [10.0, 300.0, -4.0]), [10.0, 255.0, 0.0]);
    }

    #[test]
    fn test_ccm_with_offset() {
        let ccm = ColorConversion {
            enable: true,
            coeff: [[1.5, -0.5, 0.0], [0.0, 1.0, 0.0], [0.0, -0.25, 1.25]],
            offset: [2.0, 0.0, -1.0],
        };
        let out = apply_ccm(&ccm, [100.0, 100.0, 100.0]);
        assert!((out[0] - 102.0).abs() < 1e-4);
        assert!((out[1] - 100.0).abs() < 1e-4);
        assert!((out[2] - 99.0).abs() < 1e-4);
    }

    #[test]
    fn test_disabled_ccm_is_passthrough() {
        let ccm = ColorConversion {
            enable: false,
            coeff: [[2.0; 3]; 3],
            offset: [5.0; 3],
        };
        assert_eq!(apply_ccm(&ccm, [1.0, 2.0, 3.0]), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_inverse_gamma_endpoints() {
        assert_eq!(inverse_gamma(0.0), 0.0);
        assert!((inverse_gamma(255.0) - 255.0).abs() < 1e-3);
        assert!(inverse_gamma(128.0) < 128.0);
    }

    #[test]
    fn test_neutral_gray_is_d65_white() {
        let (x, y) = xy_chromaticity([0.5, 0.5, 0.5]).unwrap();
        assert!((x - 0.3127).abs() < 1e-3, "x {x}");
        assert!((y - 0.3290).abs() < 1e-3, "y {y}");
        let cct = mccamy_cct(x, y);
        assert!((cct - 6504.0).abs() < 10.0, "cct {cct}");
    }

    #[test]
    fn test_neutral_128_estimates_near_d65() {
        let cct = estimate_cct([128.0, 128.0, 128.0], CORRECTION).unwrap();
        assert!((cct - 6510.0).abs() < 15.0, "cct {cct}");
    }

    #[test]
    fn test_red_cast_estimates_warmer() {
        let warm = estimate_cct([160.0, 128.0, 90.0], CORRECTION).unwrap();
        let neutral = estimate_cct([128.0, 128.0, 128.0], CORRECTION).unwrap();
        assert!(warm < neutral, "warm {warm} neutral {neutral}");
    }

    #[test]
    fn test_black_has_no_estimate() {
        assert!(estimate_cct([0.0, 0.0, 0.0], CORRECTION).is_none());
    }
}

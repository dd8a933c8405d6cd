use std::sync::OnceLock;

/// One entry per whole degree of the first quadrant, 0..=90.
const QUARTER_TABLE_SIZE: usize = 91;

/// Full-scale value of the fixed-point sine (sin 90° == 1.0).
pub const FIXP_ONE: i32 = i32::MAX;

static QUARTER_SINE: OnceLock<[i32; QUARTER_TABLE_SIZE]> = OnceLock::new();

/// Build the quarter-wave table. Cheap and idempotent; call it before the first
/// realtime tick so the audio thread never pays for the initialisation.
pub fn init_tables() {
    let _ = quarter_sine_table();
}

pub fn quarter_sine_table() -> &'static [i32; QUARTER_TABLE_SIZE] {
    QUARTER_SINE.get_or_init(|| {
        let mut table = [0i32; QUARTER_TABLE_SIZE];
        for (degrees, slot) in table.iter_mut().enumerate() {
            let radians = (degrees as f64).to_radians();
            *slot = (radians.sin() * f64::from(FIXP_ONE)).round() as i32;
        }
        table
    })
}

/// Fixed-point sine of a whole number of degrees, scaled to `±FIXP_ONE`.
///
/// Any integer is accepted and reduced modulo 360 first.
#[inline]
pub fn fixp_sin32(degrees: i32) -> i32 {
    let mut degrees = degrees.rem_euclid(360);
    let negative = degrees > 180;
    if negative {
        degrees -= 180;
    }
    if degrees > 90 {
        degrees = 180 - degrees;
    }

    let value = quarter_sine_table()[degrees as usize];
    if negative { -value } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cardinal_points() {
        assert_eq!(fixp_sin32(0), 0);
        assert_eq!(fixp_sin32(90), FIXP_ONE);
        assert_eq!(fixp_sin32(180), 0);
        assert_eq!(fixp_sin32(270), -FIXP_ONE);
        assert_eq!(fixp_sin32(360), 0);
    }

    #[test]
    fn test_symmetry() {
        for degrees in 0..=180 {
            assert_eq!(fixp_sin32(degrees), -fixp_sin32(degrees + 180));
            assert_eq!(fixp_sin32(degrees), fixp_sin32(180 - degrees));
        }
    }

    #[test]
    fn test_out_of_range_input_wraps() {
        assert_eq!(fixp_sin32(450), fixp_sin32(90));
        assert_eq!(fixp_sin32(-90), fixp_sin32(270));
        assert_eq!(fixp_sin32(511), fixp_sin32(151));
    }

    #[test]
    fn test_close_to_float_sine() {
        for degrees in 0..360 {
            let expected = (degrees as f64).to_radians().sin();
            let got = f64::from(fixp_sin32(degrees)) / f64::from(FIXP_ONE);
            assert!((expected - got).abs() < 1e-6, "{degrees}: {expected} vs {got}");
        }
    }
}

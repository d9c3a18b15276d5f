use rand::{Rng, rngs::OsRng};

const OTP_MIN: u32 = 100_000;
const OTP_MAX: u32 = 999_999;

/// Six decimal digits, uniform over 100000..=999999.
#[must_use]
pub fn generate_otp_code() -> String {
    OsRng.gen_range(OTP_MIN..=OTP_MAX).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_six_digits() {
        for _ in 0..200 {
            let code = generate_otp_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
            assert_ne!(code.chars().next(), Some('0'));
        }
    }

    #[test]
    fn codes_vary() {
        let codes: std::collections::HashSet<String> =
            (0..20).map(|_| generate_otp_code()).collect();
        assert!(codes.len() > 1);
    }
}

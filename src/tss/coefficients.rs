//! Reconstruction coefficients for the signing parties.
//!
//! The TSS key is `f(0)` for the user polynomial over share indexes `{1, u}`,
//! where share `1` is itself split among the servers. Weighting each server's
//! share by `L_{1}({1,u}) * λ_i(servers)` and the user's share by `L_{u}({1,u})`
//! makes the weighted sum equal the TSS secret.

use std::collections::BTreeMap;

use k256::elliptic_curve::PrimeField;
use k256::{FieldBytes, Scalar};

use crate::error::{CoreKitError, CoreKitResult};

/// Lagrange basis polynomial of `target` over `indexes`, evaluated at `at`.
pub fn lagrange_coefficient(indexes: &[Scalar], target: &Scalar, at: &Scalar) -> CoreKitResult<Scalar> {
    let mut numerator = Scalar::ONE;
    let mut denominator = Scalar::ONE;
    for index in indexes.iter().filter(|index| *index != target) {
        numerator *= *at - index;
        denominator *= *target - index;
    }
    let inverse: Option<Scalar> = denominator.invert().into();
    inverse
        .map(|inv| numerator * inv)
        .ok_or_else(|| CoreKitError::InvalidInput("Duplicate party index".to_string()))
}

/// Parse a base-16 share index into a scalar.
pub fn scalar_from_hex_index(index: &str) -> CoreKitResult<Scalar> {
    let trimmed = index.trim().trim_start_matches("0x");
    let padded = format!("{trimmed:0>64}");
    let bytes = hex::decode(&padded)?;
    if bytes.len() != 32 {
        return Err(CoreKitError::InvalidInput(format!("Share index too large: {index}")));
    }
    let repr = FieldBytes::clone_from_slice(&bytes);
    let scalar: Option<Scalar> = Scalar::from_repr(repr).into();
    scalar
        .filter(|s| !bool::from(s.is_zero()))
        .ok_or_else(|| CoreKitError::InvalidInput(format!("Invalid share index: {index}")))
}

/// 64-character zero-padded hex of a scalar.
pub fn scalar_to_hex(scalar: &Scalar) -> String {
    hex::encode(scalar.to_bytes())
}

/// Coefficient applied to the user's own TSS share.
pub fn user_coefficient(user_tss_index: &Scalar) -> CoreKitResult<Scalar> {
    lagrange_coefficient(&[Scalar::ONE, *user_tss_index], user_tss_index, &Scalar::ZERO)
}

/// Coefficients for each participating server, keyed by DKG index in hex.
pub fn server_coefficients(
    participating_server_indexes: &[u32],
    user_tss_index: &Scalar,
) -> CoreKitResult<BTreeMap<String, String>> {
    if participating_server_indexes.is_empty() {
        return Err(CoreKitError::InvalidInput(
            "No participating servers".to_string(),
        ));
    }
    let master = lagrange_coefficient(&[Scalar::ONE, *user_tss_index], &Scalar::ONE, &Scalar::ZERO)?;
    let servers: Vec<Scalar> = participating_server_indexes
        .iter()
        .map(|index| Scalar::from(u64::from(*index)))
        .collect();

    let mut coefficients = BTreeMap::new();
    for (index, server) in participating_server_indexes.iter().zip(&servers) {
        let coefficient = master * lagrange_coefficient(&servers, server, &Scalar::ZERO)?;
        coefficients.insert(format!("{index:x}"), scalar_to_hex(&coefficient));
    }
    Ok(coefficients)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(a0: Scalar, a1: Scalar, x: Scalar) -> Scalar {
        a0 + a1 * x
    }

    #[test]
    fn test_coefficients_reconstruct_secret() {
        let secret = Scalar::from(123_456_789u64);
        let slope = Scalar::from(987u64);
        let user_index = scalar_from_hex_index("2").unwrap();

        // Share 1 is re-split among three servers with g(0) = f(1).
        let share_one = eval(secret, slope, Scalar::ONE);
        let server_slope = Scalar::from(42u64);
        let servers = [1u32, 2, 3];

        let coefficients = server_coefficients(&servers, &user_index).unwrap();
        assert_eq!(coefficients.len(), 3);

        let mut total = user_coefficient(&user_index).unwrap() * eval(secret, slope, user_index);
        for server in servers {
            let coefficient_hex = &coefficients[&format!("{server:x}")];
            assert_eq!(coefficient_hex.len(), 64);
            let coefficient = scalar_from_hex_index(coefficient_hex).unwrap();
            let server_share = eval(share_one, server_slope, Scalar::from(u64::from(server)));
            total += coefficient * server_share;
        }
        assert_eq!(total, secret);
    }

    #[test]
    fn test_recovery_index_reconstructs_with_subset() {
        let secret = Scalar::from(5u64);
        let slope = Scalar::from(11u64);
        let user_index = scalar_from_hex_index("3").unwrap();
        let share_one = eval(secret, slope, Scalar::ONE);
        let server_slope = Scalar::from(7u64);
        let servers = [2u32, 3];

        let coefficients = server_coefficients(&servers, &user_index).unwrap();
        let mut total = user_coefficient(&user_index).unwrap() * eval(secret, slope, user_index);
        for server in servers {
            let coefficient = scalar_from_hex_index(&coefficients[&format!("{server:x}")]).unwrap();
            total += coefficient * eval(share_one, server_slope, Scalar::from(u64::from(server)));
        }
        assert_eq!(total, secret);
    }

    #[test]
    fn test_rejects_degenerate_indexes() {
        assert!(scalar_from_hex_index("0").is_err());
        assert!(scalar_from_hex_index("zz").is_err());
        assert!(server_coefficients(&[], &Scalar::from(2u64)).is_err());
        assert!(user_coefficient(&Scalar::ONE).is_err());
    }
}

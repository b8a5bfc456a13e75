//! A module for mixing matrix construction helpers.

use crate::errors::{IlmmError, Result};
use ndarray::{Array2, ArrayBase, Data, Ix1, Ix2};

/// Tolerance on the maximum deviation of `U^T U` from the identity
const ORTHONORMALITY_TOL: f64 = 1e-8;

/// Builds the orthogonal mixing matrix `H = U * diag(sqrt(s))` of the OILMM
/// parameterization, where `U` is a `p x m` matrix with orthonormal columns
/// and `s` a length-m vector of strictly positive scalings.
///
/// Errors if the dimensions disagree, if a scaling is not strictly positive
/// or if the columns of `U` are not orthonormal within tolerance.
pub fn orthogonal_mixing(
    u: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    s: &ArrayBase<impl Data<Elem = f64>, Ix1>,
) -> Result<Array2<f64>> {
    if u.ncols() != s.len() {
        return Err(IlmmError::MixingShape(format!(
            "U has {} columns but {} scalings were given",
            u.ncols(),
            s.len()
        )));
    }
    if u.nrows() < u.ncols() {
        return Err(IlmmError::MixingShape(format!(
            "U must have at least as many rows as columns, got {} x {}",
            u.nrows(),
            u.ncols()
        )));
    }
    if let Some(v) = s.iter().find(|v| !(**v > 0.0)) {
        return Err(IlmmError::InvalidValue(format!(
            "diagonal scalings must be strictly positive, got {v}"
        )));
    }
    let gram = u.t().dot(u);
    let eye: Array2<f64> = Array2::eye(u.ncols());
    let deviation = (&gram - &eye)
        .iter()
        .fold(0.0f64, |acc, v| acc.max(v.abs()));
    if deviation > ORTHONORMALITY_TOL {
        return Err(IlmmError::InvalidValue(format!(
            "columns of U are not orthonormal (max deviation {deviation:e})"
        )));
    }
    Ok(u.dot(&Array2::from_diag(&s.mapv(f64::sqrt))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_orthogonal_mixing_scales_columns() {
        let u = array![[1.0, 0.0], [0.0, 1.0], [0.0, 0.0]];
        let h = orthogonal_mixing(&u, &array![4.0, 9.0]).unwrap();
        assert_abs_diff_eq!(
            h,
            array![[2.0, 0.0], [0.0, 3.0], [0.0, 0.0]],
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_rotated_basis_is_accepted() {
        let c = std::f64::consts::FRAC_1_SQRT_2;
        let u = array![[c, c], [c, -c]];
        let h = orthogonal_mixing(&u, &array![1.0, 1.0]).unwrap();
        assert_abs_diff_eq!(h, u, epsilon = 1e-12);
    }

    #[test]
    fn test_non_orthonormal_columns_are_rejected() {
        let u = array![[1.0, 0.5], [0.0, 1.0]];
        assert!(matches!(
            orthogonal_mixing(&u, &array![1.0, 1.0]),
            Err(IlmmError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_bad_scalings_are_rejected() {
        let u = array![[1.0, 0.0], [0.0, 1.0]];
        assert!(matches!(
            orthogonal_mixing(&u, &array![1.0, -1.0]),
            Err(IlmmError::InvalidValue(_))
        ));
        assert!(matches!(
            orthogonal_mixing(&u, &array![1.0]),
            Err(IlmmError::MixingShape(_))
        ));
    }

    #[test]
    fn test_wide_u_is_rejected() {
        let u = array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        assert!(matches!(
            orthogonal_mixing(&u, &array![1.0, 1.0, 1.0]),
            Err(IlmmError::MixingShape(_))
        ));
    }
}

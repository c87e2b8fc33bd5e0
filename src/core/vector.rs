//! Fixed three-component vectors; components beyond the arena dimension stay zero.

/// Storage dimension. The active dimension is configured per arena (1..=3).
pub const DIM: usize = 3;

pub type Vec3 = [f64; DIM];

#[inline]
pub fn dot(a: &Vec3, b: &Vec3) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[inline]
pub fn sub(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

/// `a + b * s`
#[inline]
pub fn add_scaled(a: &Vec3, b: &Vec3, s: f64) -> Vec3 {
    [a[0] + b[0] * s, a[1] + b[1] * s, a[2] + b[2] * s]
}

#[inline]
pub fn scale(a: &Vec3, s: f64) -> Vec3 {
    [a[0] * s, a[1] * s, a[2] * s]
}

#[inline]
pub fn norm_sq(a: &Vec3) -> f64 {
    dot(a, a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helpers_agree() {
        let a = [1.0, 2.0, 3.0];
        let b = [0.5, -1.0, 2.0];
        assert_eq!(dot(&a, &b), 0.5 - 2.0 + 6.0);
        assert_eq!(sub(&a, &b), [0.5, 3.0, 1.0]);
        assert_eq!(add_scaled(&a, &b, 2.0), [2.0, 0.0, 7.0]);
        assert_eq!(norm_sq(&scale(&b, 2.0)), 4.0 * norm_sq(&b));
    }
}

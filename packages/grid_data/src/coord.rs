//! Division and modulo for grid coordinates.
//!
//! Unlike the built-in `/` and `%` operators, these behave uniformly over the
//! entire number range, no matter if the input is positive or negative.


/// Division rounding down instead of towards zero, so the remainder is always
/// zero or positive.
///
/// `floor_div(9, 4) == 2`, but `floor_div(-9, 4) == -3` where `-9 / 4 == -2`.
pub fn floor_div(x: i32, divisor: i32) -> i32 {
    x.div_euclid(divisor)
}

/// Division rounding up instead of towards zero, so the remainder is always
/// zero or negative.
///
/// `ceil_div(9, 4) == 3`, and `ceil_div(-9, 4) == -2` like `-9 / 4`.
pub fn ceil_div(x: i32, divisor: i32) -> i32 {
    -(-x).div_euclid(divisor)
}

/// Remainder of `floor_div`, always zero or positive.
///
/// `floor_mod(-9, 4) == 3` where `-9 % 4 == -1`.
pub fn floor_mod(x: i32, period: i32) -> i32 {
    x.rem_euclid(period)
}

//! Conversion of fractional ratios into integer shares of a burst.

/// Round `new_ratio` to shares summing exactly to `burst`.
///
/// Links whose ratio decreased against `last_ratio` are rounded first with
/// `bias` (<= 0) added, so decreases come out slightly larger. The rest of
/// the burst goes to the other links in proportion to their ratio. Any rounding
/// remainder is then fixed up one unit at a time on the currently largest
/// share, ties going to the lowest index.
pub(crate) fn ratio_to_shares(new_ratio: &[f64], last_ratio: &[f64], burst: u32, bias: f64) -> Vec<u32> {
    let mut shares = vec![0i64; new_ratio.len()];
    let mut decreased_sum = 0i64;
    let mut kept_ratio_sum = 0.0;

    for (i, &ratio) in new_ratio.iter().enumerate() {
        let previous = last_ratio.get(i).copied().unwrap_or(0.0);
        if ratio < previous {
            let share = (ratio * f64::from(burst) + bias).round().max(0.0) as i64;
            shares[i] = share;
            decreased_sum += share;
        } else {
            kept_ratio_sum += ratio;
        }
    }

    let remaining = (i64::from(burst) - decreased_sum).max(0) as f64;
    if kept_ratio_sum > 0.0 {
        for (i, &ratio) in new_ratio.iter().enumerate() {
            let previous = last_ratio.get(i).copied().unwrap_or(0.0);
            if ratio >= previous {
                shares[i] = (remaining * ratio / kept_ratio_sum).round().max(0.0) as i64;
            }
        }
    }

    let target = i64::from(burst);
    let mut total: i64 = shares.iter().sum();
    while total < target {
        let idx = largest_index(&shares);
        shares[idx] += 1;
        total += 1;
    }
    while total > target {
        let idx = largest_index(&shares);
        shares[idx] -= 1;
        total -= 1;
    }

    shares.into_iter().map(|s| s as u32).collect()
}

/// First index holding the maximum value.
fn largest_index(values: &[i64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrease_is_rounded_first() {
        let shares = ratio_to_shares(&[0.75, 0.25], &[1.0, 0.0], 8, -0.3);
        assert_eq!(shares, vec![6, 2]);
    }

    #[test]
    fn negative_bias_accelerates_decreases() {
        let biased = ratio_to_shares(&[0.5625, 0.4375], &[0.75, 0.25], 8, -0.3);
        assert_eq!(biased, vec![4, 4]);
        let unbiased = ratio_to_shares(&[0.5625, 0.4375], &[0.75, 0.25], 8, 0.0);
        assert_eq!(unbiased, vec![5, 3]);
    }

    #[test]
    fn overshoot_is_taken_from_first_largest() {
        let third = 1.0 / 3.0;
        let shares = ratio_to_shares(&[third, third, third], &[0.0, 0.0, 0.0], 8, -0.3);
        assert_eq!(shares, vec![2, 3, 3]);
    }

    #[test]
    fn undershoot_is_given_to_first_largest() {
        // 2.4, 2.4, 3.2 round to 7 in total.
        let shares = ratio_to_shares(&[0.3, 0.3, 0.4], &[0.0; 3], 8, -0.3);
        assert_eq!(shares, vec![2, 2, 4]);

        // 0.1875*8 - 0.3 = 1.2, so both decreasing links keep 1.
        let shares = ratio_to_shares(&[0.1875, 0.1875, 0.625], &[0.5, 0.5, 0.0], 8, -0.3);
        assert_eq!(shares, vec![1, 1, 6]);

        let shares = ratio_to_shares(&[0.2; 5], &[0.0; 5], 8, -0.3);
        assert_eq!(shares, vec![1, 1, 2, 2, 2]);
    }

    #[test]
    fn full_steer_rounds_exactly() {
        let shares = ratio_to_shares(&[0.0, 1.0], &[1.0, 0.0], 128, -0.3);
        assert_eq!(shares, vec![0, 128]);
    }
}

//! Pollard-rho (Brent variant) integer factorization for the PQ step.

use crate::fill_random;

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

fn abs_sub(a: u128, b: u128) -> u128 {
    a.max(b) - a.min(b)
}

/// One Brent cycle with the given walk parameters. Returns a divisor of
/// `pq`, possibly the trivial `pq` itself when the walk collapses.
fn brent(pq: u128, y0: u128, c: u128, m: u128) -> u128 {
    let step = |y: u128| (y * y % pq + c) % pq;

    let mut y = y0;
    let mut g = 1u128;
    let mut r = 1u128;
    let mut q = 1u128;
    let mut x = 0u128;
    let mut ys = 0u128;

    while g == 1 {
        x = y;
        for _ in 0..r {
            y = step(y);
        }
        let mut k = 0;
        while k < r && g == 1 {
            ys = y;
            for _ in 0..m.min(r - k) {
                y = step(y);
                q = q * abs_sub(x, y) % pq;
            }
            g = gcd(q, pq);
            k += m;
        }
        r *= 2;
    }

    if g == pq {
        loop {
            ys = step(ys);
            g = gcd(abs_sub(x, ys), pq);
            if g > 1 {
                break;
            }
        }
    }

    g
}

fn random_in(limit: u64) -> u128 {
    let mut buf = [0u8; 8];
    fill_random(&mut buf);
    u128::from(1 + u64::from_le_bytes(buf) % limit)
}

/// Factorize the 63-bit composite `pq` into `(p, q)` with `p ≤ q`.
///
/// Walk parameters are drawn fresh per attempt, so individual runs differ
/// internally, yet the returned factor pair is a pure function of `pq`.
pub fn factorize(pq: u64) -> (u64, u64) {
    if pq % 2 == 0 {
        return (2, pq / 2);
    }
    let n = u128::from(pq);
    loop {
        let y = random_in(pq - 1);
        let c = random_in(pq - 1);
        let m = random_in(pq - 1);
        let g = brent(n, y, c, m);
        if g > 1 && g < n {
            let p = g as u64;
            let q = pq / p;
            return (p.min(q), p.max(q));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t1() {
        assert_eq!(factorize(1470626929934143021), (1206429347, 1218991343));
    }

    #[test]
    fn t2() {
        assert_eq!(factorize(2363612107535801713), (1518968219, 1556064227));
    }

    #[test]
    fn even_composite_shortcuts_to_two() {
        assert_eq!(factorize(2 * 1218991343), (2, 1218991343));
    }

    #[test]
    fn small_semiprime() {
        assert_eq!(factorize(15), (3, 5));
    }
}

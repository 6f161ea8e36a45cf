/// Largest prime factor of `n` (n >= 1; returns 1 for n <= 1).
pub fn max_prime_factor(mut n: u32) -> u32 {
    let mut largest = 1;
    let mut p = 2;
    while p * p <= n {
        while n % p == 0 {
            largest = p;
            n /= p;
        }
        p += 1;
    }
    if n > 1 {
        largest = n;
    }
    largest
}

/// Smallest even integer >= `target` with no prime factor greater than 7.
///
/// The imaging backend's FFT gridder only handles 7-smooth sizes, and odd
/// sizes put the image center half a pixel off the facet center. Callers
/// clamp the result to a minimum of 512 pixels.
pub fn optimum_size(target: f64) -> u32 {
    let mut n = target.ceil().max(2.0) as u32;
    if n % 2 != 0 {
        n += 1;
    }
    while max_prime_factor(n) > 7 {
        n += 2;
    }
    n
}

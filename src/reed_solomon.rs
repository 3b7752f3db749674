/*! Reed-Solomon codec over GF(2⁸) for the FX.25 outer block.

The field is GF(2⁸) reduced by 0x11d. The generator polynomial for
`nroots` check symbols has roots α^(255−nroots) … α^254, the first
block byte maps to the lowest data coefficient, and check bytes go on
the wire lowest degree first. That combination is what interoperates
with deployed FX.25 gear; it is not what most off-the-shelf RS crates
emit, which is why this lives here.

Up to ⌊nroots/2⌋ byte errors are correctable. The decoder is the
textbook chain: syndromes, Berlekamp-Massey, Chien search, Forney.
*/
use crate::{Error, Result};

const POLY: u16 = 0x11d;

// alpha^i for i in 0..510, so products of two logs need no reduction.
const EXP: [u8; 510] = {
    let mut exp = [0u8; 510];
    let mut x: u16 = 1;
    let mut i = 0;
    while i < 255 {
        exp[i] = x as u8;
        exp[i + 255] = x as u8;
        x <<= 1;
        if x & 0x100 != 0 {
            x ^= POLY;
        }
        i += 1;
    }
    exp
};

// log of alpha^i; LOG[0] is unused.
const LOG: [u8; 256] = {
    let mut log = [0u8; 256];
    let mut x: u16 = 1;
    let mut i = 0;
    while i < 255 {
        log[x as usize] = i as u8;
        x <<= 1;
        if x & 0x100 != 0 {
            x ^= POLY;
        }
        i += 1;
    }
    log
};

#[inline]
fn gmul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        0
    } else {
        EXP[LOG[a as usize] as usize + LOG[b as usize] as usize]
    }
}

#[inline]
fn ginv(a: u8) -> u8 {
    debug_assert_ne!(a, 0);
    EXP[255 - LOG[a as usize] as usize]
}

#[inline]
fn alpha_pow(e: usize) -> u8 {
    EXP[e % 255]
}

// Generator polynomial, ascending coefficients, monic of degree nroots.
fn gen_poly(nroots: usize) -> Vec<u8> {
    let fcr = 255 - nroots;
    let mut g = vec![1u8];
    for j in 0..nroots {
        let root = alpha_pow(fcr + j);
        let mut next = vec![0u8; g.len() + 1];
        for (i, &c) in g.iter().enumerate() {
            next[i + 1] ^= c;
            next[i] ^= gmul(c, root);
        }
        g = next;
    }
    g
}

/// Compute `nroots` check bytes for `data`, in wire order.
#[must_use]
pub fn encode(data: &[u8], nroots: usize) -> Vec<u8> {
    let g = gen_poly(nroots);
    let mut rem = vec![0u8; nroots];
    // The first data byte is the lowest coefficient, so synthetic
    // division runs back to front.
    for &b in data.iter().rev() {
        let fb = b ^ rem[nroots - 1];
        for i in (1..nroots).rev() {
            rem[i] = rem[i - 1] ^ gmul(fb, g[i]);
        }
        rem[0] = gmul(fb, g[0]);
    }
    rem
}

/// Correct a block (data followed by `nroots` check bytes) in place.
///
/// Returns the number of corrected byte errors, or [`Error::Fec`] when
/// the block holds more errors than the code can repair.
pub fn decode(block: &mut [u8], nroots: usize) -> Result<usize> {
    let n = block.len();
    if nroots == 0 || n <= nroots || n > 255 {
        return Err(Error::InvalidInput(format!(
            "bad RS geometry: {n} bytes, {nroots} roots"
        )));
    }
    let k = n - nroots;
    let fcr = 255 - nroots;

    // Standard codeword, highest degree coefficient first.
    let mut w: Vec<u8> = Vec::with_capacity(n);
    w.extend(block[..k].iter().rev());
    w.extend(block[k..].iter().rev());

    let syndromes: Vec<u8> = (0..nroots)
        .map(|m| {
            let a = alpha_pow(fcr + m);
            w.iter().fold(0u8, |acc, &c| gmul(acc, a) ^ c)
        })
        .collect();
    if syndromes.iter().all(|&s| s == 0) {
        return Ok(0);
    }

    // Berlekamp-Massey for the error locator polynomial.
    let mut lambda = vec![0u8; nroots + 1];
    let mut prev = vec![0u8; nroots + 1];
    lambda[0] = 1;
    prev[0] = 1;
    let mut errors = 0usize;
    let mut m = 1usize;
    let mut b = 1u8;
    for step in 0..nroots {
        let mut d = syndromes[step];
        for i in 1..=errors {
            d ^= gmul(lambda[i], syndromes[step - i]);
        }
        if d == 0 {
            m += 1;
        } else if 2 * errors <= step {
            let t = lambda.clone();
            let coef = gmul(d, ginv(b));
            for i in 0..(nroots + 1).saturating_sub(m) {
                lambda[i + m] ^= gmul(coef, prev[i]);
            }
            errors = step + 1 - errors;
            prev = t;
            b = d;
            m = 1;
        } else {
            let coef = gmul(d, ginv(b));
            for i in 0..(nroots + 1).saturating_sub(m) {
                lambda[i + m] ^= gmul(coef, prev[i]);
            }
            m += 1;
        }
    }
    if errors > nroots / 2 {
        return Err(Error::Fec(format!("{errors} errors exceed capacity")));
    }

    // Chien search over the valid degrees.
    let mut positions = Vec::with_capacity(errors);
    for deg in 0..n {
        let x_inv = 255 - deg % 255;
        let acc = (0..=errors).fold(0u8, |acc, i| acc ^ gmul(lambda[i], alpha_pow(x_inv * i)));
        if acc == 0 {
            positions.push(deg);
        }
    }
    if positions.len() != errors {
        return Err(Error::Fec(format!(
            "error locator has {} roots, expected {errors}",
            positions.len()
        )));
    }

    // Forney error magnitudes. Omega = S(x)·Lambda(x) mod x^nroots.
    let mut omega = vec![0u8; nroots];
    for (i, o) in omega.iter_mut().enumerate() {
        let mut acc = 0u8;
        for j in 0..=i.min(errors) {
            acc ^= gmul(lambda[j], syndromes[i - j]);
        }
        *o = acc;
    }
    for &deg in &positions {
        let x_inv = 255 - deg % 255;
        let mut num = omega
            .iter()
            .enumerate()
            .fold(0u8, |acc, (i, &o)| acc ^ gmul(o, alpha_pow(x_inv * i)));
        num = gmul(num, alpha_pow(deg * (256 - fcr)));
        let den = (1..=errors)
            .step_by(2)
            .fold(0u8, |acc, i| acc ^ gmul(lambda[i], alpha_pow(x_inv * (i - 1))));
        if den == 0 {
            return Err(Error::Fec("zero denominator in Forney".to_string()));
        }
        w[n - 1 - deg] ^= gmul(num, ginv(den));
    }

    for (i, &v) in w[..k].iter().rev().enumerate() {
        block[i] = v;
    }
    for (i, &v) in w[k..].iter().rev().enumerate() {
        block[k + i] = v;
    }
    Ok(errors)
}

//! Shape-aware kernels built from element `add` and `multiply`.
//! Tensors are flat row-major slices.
use super::arith::{add, multiply};
use super::{KernelError, KernelResult};
use crate::crypto::Evaluator;
use crate::handle::{HeValue, PlaintextHandle};

type BinaryKernel = fn(&HeValue, &HeValue, &dyn Evaluator) -> KernelResult<HeValue>;

/// Element count of `shape`, or `None` when it overflows `usize`.
pub fn checked_shape_size(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}

/// Element count of `shape`, saturating at `usize::MAX`.
pub fn shape_size(shape: &[usize]) -> usize {
    checked_shape_size(shape).unwrap_or(usize::MAX)
}

fn check_len(values: &[HeValue], shape: &[usize]) -> KernelResult<()> {
    if values.len() == shape_size(shape) {
        Ok(())
    } else {
        Err(KernelError::ShapeMismatch(format!(
            "{} elements for shape {shape:?}",
            values.len()
        )))
    }
}

/// Applies `kernel` pairwise to equally sized operands.
pub fn elementwise(
    a: &[HeValue],
    b: &[HeValue],
    kernel: BinaryKernel,
    evaluator: &dyn Evaluator,
) -> KernelResult<Vec<HeValue>> {
    if a.len() != b.len() {
        return Err(KernelError::LengthMismatch {
            arg: a.len(),
            out: b.len(),
        });
    }
    a.iter().zip(b).map(|(x, y)| kernel(x, y, evaluator)).collect()
}

fn sum_products<'a>(
    pairs: impl Iterator<Item = (&'a HeValue, &'a HeValue)>,
    evaluator: &dyn Evaluator,
) -> KernelResult<HeValue> {
    let mut acc: Option<HeValue> = None;
    for (x, y) in pairs {
        let term = multiply(x, y, evaluator)?;
        acc = Some(match acc {
            None => term,
            Some(sum) => add(&sum, &term, evaluator)?,
        });
    }
    acc.ok_or_else(|| KernelError::ShapeMismatch("empty reduction".into()))
}

/// Contracts the last axis of `a` with the first axis of `b`.
pub fn dot(
    a: &[HeValue],
    a_shape: &[usize],
    b: &[HeValue],
    b_shape: &[usize],
    evaluator: &dyn Evaluator,
) -> KernelResult<Vec<HeValue>> {
    check_len(a, a_shape)?;
    check_len(b, b_shape)?;
    let (Some(&k), Some(&k_b)) = (a_shape.last(), b_shape.first()) else {
        return Err(KernelError::ShapeMismatch("dot needs rank >= 1 operands".into()));
    };
    if k != k_b {
        return Err(KernelError::ShapeMismatch(format!(
            "dot reduction axes differ: {a_shape:?} . {b_shape:?}"
        )));
    }
    let rows = shape_size(&a_shape[..a_shape.len() - 1]);
    let cols = shape_size(&b_shape[1..]);
    let mut out = Vec::with_capacity(rows * cols);
    for i in 0..rows {
        for j in 0..cols {
            let pairs = (0..k).map(|t| (&a[i * k + t], &b[t * cols + j]));
            out.push(sum_products(pairs, evaluator)?);
        }
    }
    Ok(out)
}

fn window_output(input: usize, window: usize, stride: usize) -> KernelResult<usize> {
    if window == 0 || stride == 0 || window > input {
        return Err(KernelError::ShapeMismatch(format!(
            "window {window} stride {stride} over extent {input}"
        )));
    }
    Ok((input - window) / stride + 1)
}

/// Output shape of an unpadded NCHW convolution or pool.
pub fn window_shape(
    batch: usize,
    channels: usize,
    input: [usize; 2],
    window: [usize; 2],
    strides: [usize; 2],
) -> KernelResult<[usize; 4]> {
    Ok([
        batch,
        channels,
        window_output(input[0], window[0], strides[0])?,
        window_output(input[1], window[1], strides[1])?,
    ])
}

fn as_nchw(shape: &[usize]) -> KernelResult<[usize; 4]> {
    shape
        .try_into()
        .map_err(|_| KernelError::ShapeMismatch(format!("expected rank 4, got {shape:?}")))
}

/// NCHW data with OIHW filters, no padding.
pub fn convolution(
    data: &[HeValue],
    data_shape: &[usize],
    filter: &[HeValue],
    filter_shape: &[usize],
    strides: [usize; 2],
    evaluator: &dyn Evaluator,
) -> KernelResult<Vec<HeValue>> {
    check_len(data, data_shape)?;
    check_len(filter, filter_shape)?;
    let [n, c, h, w] = as_nchw(data_shape)?;
    let [o, fc, kh, kw] = as_nchw(filter_shape)?;
    if fc != c {
        return Err(KernelError::ShapeMismatch(format!(
            "filter expects {fc} channels, data has {c}"
        )));
    }
    let [_, _, oh, ow] = window_shape(n, o, [h, w], [kh, kw], strides)?;
    let at = |b: usize, ch: usize, y: usize, x: usize| ((b * c + ch) * h + y) * w + x;
    let f_at = |oc: usize, ch: usize, y: usize, x: usize| ((oc * c + ch) * kh + y) * kw + x;

    let mut out = Vec::with_capacity(n * o * oh * ow);
    for b in 0..n {
        for oc in 0..o {
            for oy in 0..oh {
                for ox in 0..ow {
                    let pairs = (0..c).flat_map(|ch| {
                        (0..kh).flat_map(move |ky| {
                            (0..kw).map(move |kx| {
                                let y = oy * strides[0] + ky;
                                let x = ox * strides[1] + kx;
                                (&data[at(b, ch, y, x)], &filter[f_at(oc, ch, ky, kx)])
                            })
                        })
                    });
                    out.push(sum_products(pairs, evaluator)?);
                }
            }
        }
    }
    Ok(out)
}

/// Window sum times the plaintext `1 / (kh * kw)`.
pub fn avg_pool(
    data: &[HeValue],
    data_shape: &[usize],
    window: [usize; 2],
    strides: [usize; 2],
    evaluator: &dyn Evaluator,
) -> KernelResult<Vec<HeValue>> {
    check_len(data, data_shape)?;
    let [n, c, h, w] = as_nchw(data_shape)?;
    let [_, _, oh, ow] = window_shape(n, c, [h, w], window, strides)?;
    let inv = HeValue::Plain(PlaintextHandle::scalar(1.0 / (window[0] * window[1]) as f64));

    let mut out = Vec::with_capacity(n * c * oh * ow);
    for b in 0..n {
        for ch in 0..c {
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut acc: Option<HeValue> = None;
                    for ky in 0..window[0] {
                        for kx in 0..window[1] {
                            let y = oy * strides[0] + ky;
                            let x = ox * strides[1] + kx;
                            let v = &data[((b * c + ch) * h + y) * w + x];
                            acc = Some(match acc {
                                None => v.clone(),
                                Some(sum) => add(&sum, v, evaluator)?,
                            });
                        }
                    }
                    let sum = acc.ok_or_else(|| KernelError::ShapeMismatch("empty window".into()))?;
                    out.push(multiply(&sum, &inv, evaluator)?);
                }
            }
        }
    }
    Ok(out)
}

/// Right-aligned broadcast: input axes of extent 1 (or missing leading
/// axes) are repeated to fill `out_shape`.
pub fn broadcast(
    values: &[HeValue],
    in_shape: &[usize],
    out_shape: &[usize],
) -> KernelResult<Vec<HeValue>> {
    check_len(values, in_shape)?;
    if in_shape.len() > out_shape.len() {
        return Err(KernelError::ShapeMismatch(format!(
            "cannot broadcast {in_shape:?} to {out_shape:?}"
        )));
    }
    let offset = out_shape.len() - in_shape.len();
    for (axis, &d) in in_shape.iter().enumerate() {
        if d != 1 && d != out_shape[offset + axis] {
            return Err(KernelError::ShapeMismatch(format!(
                "cannot broadcast {in_shape:?} to {out_shape:?}"
            )));
        }
    }
    let total = shape_size(out_shape);
    let mut out = Vec::with_capacity(total);
    for flat in 0..total {
        let mut rem = flat;
        let mut src = 0;
        let mut stride = 1;
        for axis in (0..out_shape.len()).rev() {
            let idx = rem % out_shape[axis];
            rem /= out_shape[axis];
            if axis >= offset {
                let d = in_shape[axis - offset];
                if d != 1 {
                    src += idx * stride;
                }
                stride *= d;
            }
        }
        out.push(values[src].clone());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CkksContext, CkksEvaluator, CkksParams, KeySet, decrypt};
    use crate::keys::SecretKey;
    use crate::handle::{CiphertextHandle, Packing};
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use std::sync::Arc;

    fn setup() -> (CkksEvaluator, SecretKey) {
        let context = Arc::new(CkksContext::new(CkksParams::toy()).unwrap());
        let mut rng = ChaCha20Rng::seed_from_u64(21);
        let keys = KeySet::generate(&context, &mut rng).unwrap();
        let ev = CkksEvaluator::new(context, keys.public, keys.relin, 1).unwrap();
        (ev, keys.secret)
    }

    #[test]
    fn shape_size_overflow_is_detected() {
        assert_eq!(checked_shape_size(&[2, 3, 4]), Some(24));
        assert_eq!(checked_shape_size(&[]), Some(1));
        assert_eq!(checked_shape_size(&[1 << 40, 1 << 40]), None);
        assert_eq!(shape_size(&[1 << 40, 1 << 40]), usize::MAX);
    }

    fn plain(values: &[f64]) -> Vec<HeValue> {
        values.iter().map(|&v| HeValue::Plain(PlaintextHandle::scalar(v))).collect()
    }

    fn cipher(ev: &CkksEvaluator, values: &[f64]) -> Vec<HeValue> {
        let scale = ev.context().default_scale();
        values
            .iter()
            .map(|&v| {
                let ct = ev.encrypt(&[v], Packing::Real, scale, 3).unwrap();
                HeValue::Cipher(CiphertextHandle::encrypted(ct, Packing::Real))
            })
            .collect()
    }

    fn open(ev: &CkksEvaluator, sk: &SecretKey, value: &HeValue) -> f64 {
        match value {
            HeValue::Plain(p) => p.lane(0),
            HeValue::Cipher(c) => match c.ciphertext() {
                None => 0.0,
                Some(ct) => {
                    let pt = decrypt(ct, sk).unwrap();
                    ev.context().decode(&pt, Packing::Real, 1).unwrap()[0]
                }
            },
        }
    }

    #[test]
    fn plain_dot_and_matrix_product() {
        let (ev, _) = setup();
        let a = plain(&[2.0, 2.0, 3.0, 4.0]);
        let b = plain(&[5.0, 6.0, 7.0, 8.0]);
        let out = dot(&a, &[4], &b, &[4], &ev).unwrap();
        assert_eq!(out, plain(&[75.0]));

        // [[1,2],[3,4]] . [[5,6],[7,8]]
        let m = plain(&[1.0, 2.0, 3.0, 4.0]);
        let out = dot(&m, &[2, 2], &b, &[2, 2], &ev).unwrap();
        assert_eq!(out, plain(&[19.0, 22.0, 43.0, 50.0]));
        assert!(dot(&m, &[2, 2], &b, &[4], &ev).is_err());
    }

    #[test]
    fn cipher_dot_with_plain_weights() {
        let (ev, sk) = setup();
        let a = cipher(&ev, &[2.0, 2.0, 3.0, 4.0]);
        let b = plain(&[5.0, 6.0, 7.0, 8.0]);
        let out = dot(&a, &[4], &b, &[4], &ev).unwrap();
        assert_abs_diff_eq!(open(&ev, &sk, &out[0]), 75.0, epsilon = 1e-3);
    }

    #[test]
    fn convolution_plain() {
        let (ev, _) = setup();
        let data = plain(&[2.0; 25]);
        let filter = plain(&[0.5; 9]);
        let out = convolution(&data, &[1, 1, 5, 5], &filter, &[1, 1, 3, 3], [1, 1], &ev).unwrap();
        assert_eq!(out, plain(&[9.0; 9]));
        let strided =
            convolution(&data, &[1, 1, 5, 5], &filter, &[1, 1, 3, 3], [2, 2], &ev).unwrap();
        assert_eq!(strided.len(), 4);
    }

    #[test]
    fn avg_pool_plain_and_cipher() {
        let (ev, sk) = setup();
        let values: Vec<f64> = (0..16).map(f64::from).collect();
        let out = avg_pool(&plain(&values), &[1, 1, 4, 4], [2, 2], [2, 2], &ev).unwrap();
        assert_eq!(out, plain(&[2.5, 4.5, 10.5, 12.5]));

        let out = avg_pool(&cipher(&ev, &values), &[1, 1, 4, 4], [2, 2], [2, 2], &ev).unwrap();
        for (v, e) in out.iter().zip([2.5, 4.5, 10.5, 12.5]) {
            assert_abs_diff_eq!(open(&ev, &sk, v), e, epsilon = 1e-3);
        }
    }

    #[test]
    fn zero_semantics() {
        let (ev, sk) = setup();
        let x = cipher(&ev, &[3.0]).remove(0);
        let scale = ev.context().default_scale();
        let zero = HeValue::Cipher(CiphertextHandle::zero(Packing::Real, scale, 3));

        let sum = add(&zero, &x, &ev).unwrap();
        assert_eq!(sum, x);

        let HeValue::Cipher(p) = multiply(&zero, &x, &ev).unwrap() else { panic!() };
        assert!(p.is_zero());
        assert_eq!(p.scale(), scale * scale);

        let HeValue::Cipher(p) =
            multiply(&x, &HeValue::Plain(PlaintextHandle::scalar(0.0)), &ev).unwrap()
        else {
            panic!()
        };
        assert!(p.is_zero());
        assert_eq!(p.level(), 3);

        let shifted = add(&zero, &HeValue::Plain(PlaintextHandle::scalar(1.5)), &ev).unwrap();
        assert_abs_diff_eq!(open(&ev, &sk, &shifted), 1.5, epsilon = 1e-6);
    }

    #[test]
    fn mismatched_zero_operands_fail() {
        let (ev, _) = setup();
        let x = cipher(&ev, &[3.0]).remove(0);
        let zero = HeValue::Cipher(CiphertextHandle::zero(Packing::Real, 1.0, 3));
        assert!(matches!(
            add(&zero, &x, &ev),
            Err(KernelError::Ckks(crate::crypto::CkksError::ScaleMismatch { .. }))
        ));
        let complex = HeValue::Cipher(CiphertextHandle::zero(
            Packing::Complex,
            ev.context().default_scale(),
            3,
        ));
        assert!(matches!(add(&complex, &x, &ev), Err(KernelError::PackingMismatch { .. })));
        assert!(matches!(
            multiply(&complex, &complex, &ev),
            Err(KernelError::UnsupportedPacking { .. })
        ));
    }

    #[test]
    fn broadcast_scalar_and_row() {
        let scalar = plain(&[7.0]);
        assert_eq!(broadcast(&scalar, &[], &[2, 3]).unwrap(), plain(&[7.0; 6]));
        let row = plain(&[1.0, 2.0, 3.0]);
        assert_eq!(
            broadcast(&row, &[3], &[2, 3]).unwrap(),
            plain(&[1.0, 2.0, 3.0, 1.0, 2.0, 3.0])
        );
        let col = plain(&[1.0, 2.0]);
        assert_eq!(
            broadcast(&col, &[2, 1], &[2, 3]).unwrap(),
            plain(&[1.0, 1.0, 1.0, 2.0, 2.0, 2.0])
        );
        assert!(broadcast(&row, &[3], &[3, 2]).is_err());
    }

    #[test]
    fn elementwise_requires_equal_lengths() {
        let (ev, _) = setup();
        let out = elementwise(&plain(&[1.0, 2.0]), &plain(&[3.0, 4.0]), add, &ev).unwrap();
        assert_eq!(out, plain(&[4.0, 6.0]));
        assert!(elementwise(&plain(&[1.0]), &plain(&[3.0, 4.0]), multiply, &ev).is_err());
    }
}

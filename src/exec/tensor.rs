use super::{ExecError, ExecResult};
use crate::crypto::{CkksContext, Evaluator, decrypt};
use crate::graph::ElementType;
use crate::handle::{CipherState, CiphertextHandle, HeValue, Packing, PlaintextHandle};
use crate::kernel::{checked_shape_size, shape_size};
use crate::keys::SecretKey;

/// A logical tensor stored as handles.
///
/// With `batch_size = b > 1` the leading axis is split into groups of `b`
/// consecutive items and each handle carries one lane per item, so only
/// `shape_size(shape) / b` handles are stored. Their layout is
/// [`HeTensor::packed_shape`].
#[derive(Debug, Clone)]
pub struct HeTensor {
    element_type: ElementType,
    shape: Vec<usize>,
    batch_size: usize,
    values: Vec<HeValue>,
}

impl HeTensor {
    pub fn new(
        element_type: ElementType,
        shape: Vec<usize>,
        batch_size: usize,
        values: Vec<HeValue>,
    ) -> ExecResult<Self> {
        if checked_shape_size(&shape).is_none() {
            return Err(ExecError::ShapeOverflow(shape));
        }
        let packed = Self::packed_shape_of(&shape, batch_size)?;
        if values.len() != shape_size(&packed) {
            return Err(ExecError::ValueCount(values.len()));
        }
        Ok(Self {
            element_type,
            shape,
            batch_size,
            values,
        })
    }

    /// `shape` with its leading axis divided by `batch_size`.
    pub fn packed_shape_of(shape: &[usize], batch_size: usize) -> ExecResult<Vec<usize>> {
        if batch_size == 1 {
            return Ok(shape.to_vec());
        }
        match shape.first() {
            Some(&n) if batch_size > 1 && n % batch_size == 0 => {
                let mut packed = shape.to_vec();
                packed[0] = n / batch_size;
                Ok(packed)
            }
            _ => Err(ExecError::Batch(format!(
                "batch size {batch_size} does not divide the leading axis of {shape:?}"
            ))),
        }
    }

    /// Plaintext tensor from row-major `data`.
    pub fn plain(
        element_type: ElementType,
        shape: Vec<usize>,
        batch_size: usize,
        data: &[f64],
    ) -> ExecResult<Self> {
        let values = batch_lanes(data, &shape, batch_size)?
            .into_iter()
            .map(|lanes| HeValue::Plain(PlaintextHandle::new(lanes)))
            .collect();
        Self::new(element_type, shape, batch_size, values)
    }

    /// Encrypts row-major `data` at the top level and default scale.
    pub fn encrypt(
        element_type: ElementType,
        shape: Vec<usize>,
        batch_size: usize,
        data: &[f64],
        packing: Packing,
        evaluator: &dyn Evaluator,
    ) -> ExecResult<Self> {
        let context = evaluator.context();
        let capacity = packing.lane_capacity(context.slot_count());
        if batch_size > capacity {
            return Err(ExecError::LaneCapacity {
                batch: batch_size,
                capacity,
            });
        }
        let (scale, level) = (context.default_scale(), context.top_level());
        let values = batch_lanes(data, &shape, batch_size)?
            .into_iter()
            .map(|lanes| {
                let ct = evaluator.encrypt(&lanes, packing, scale, level)?;
                Ok(HeValue::Cipher(CiphertextHandle::encrypted(ct, packing)))
            })
            .collect::<ExecResult<Vec<_>>>()?;
        Self::new(element_type, shape, batch_size, values)
    }

    /// Row-major values, decrypting where needed. Tensors without
    /// ciphertexts can be read without a key.
    pub fn decrypt(
        &self,
        secret_key: Option<&SecretKey>,
        context: &CkksContext,
    ) -> ExecResult<Vec<f64>> {
        let b = self.batch_size;
        let lanes = self
            .values
            .iter()
            .map(|value| match value {
                HeValue::Plain(p) => Ok((0..b).map(|l| p.lane(l)).collect()),
                HeValue::Cipher(c) => match c.state() {
                    CipherState::Zero { .. } => Ok(vec![0.0; b]),
                    CipherState::Encrypted(ct) => {
                        let secret_key = secret_key.ok_or(ExecError::MissingSecretKey)?;
                        let pt = decrypt(ct, secret_key)?;
                        Ok(context.decode(&pt, c.packing(), b)?)
                    }
                },
            })
            .collect::<ExecResult<Vec<Vec<f64>>>>()?;
        Ok(unbatch_lanes(&lanes, &self.shape, b))
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn packed_shape(&self) -> Vec<usize> {
        let mut packed = self.shape.clone();
        if let Some(n) = packed.first_mut() {
            *n /= self.batch_size;
        }
        packed
    }

    pub fn values(&self) -> &[HeValue] {
        &self.values
    }

    pub fn into_values(self) -> Vec<HeValue> {
        self.values
    }

    pub fn is_encrypted(&self) -> bool {
        self.values.iter().any(HeValue::is_cipher)
    }
}

/// Groups row-major `data` into one lane vector per packed element.
fn batch_lanes(data: &[f64], shape: &[usize], batch_size: usize) -> ExecResult<Vec<Vec<f64>>> {
    if data.len() != shape_size(shape) {
        return Err(ExecError::ValueCount(data.len()));
    }
    let packed = HeTensor::packed_shape_of(shape, batch_size)?;
    let inner = shape_size(shape.get(1..).unwrap_or(&[]));
    Ok((0..shape_size(&packed))
        .map(|p| {
            let (i, e) = (p / inner.max(1), p % inner.max(1));
            (0..batch_size)
                .map(|l| data[(i * batch_size + l) * inner + e])
                .collect()
        })
        .collect())
}

fn unbatch_lanes(lanes: &[Vec<f64>], shape: &[usize], batch_size: usize) -> Vec<f64> {
    let inner = shape_size(shape.get(1..).unwrap_or(&[])).max(1);
    let mut data = vec![0.0; shape_size(shape)];
    for (p, element) in lanes.iter().enumerate() {
        let (i, e) = (p / inner, p % inner);
        for (l, &v) in element.iter().enumerate().take(batch_size) {
            data[(i * batch_size + l) * inner + e] = v;
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batching_groups_leading_axis() {
        let data: Vec<f64> = (0..12).map(f64::from).collect();
        let t = HeTensor::plain(ElementType::F32, vec![4, 3], 2, &data).unwrap();
        assert_eq!(t.packed_shape(), vec![2, 3]);
        assert_eq!(t.values().len(), 6);
        let HeValue::Plain(first) = &t.values()[0] else {
            panic!("plain tensor holds plaintexts");
        };
        assert_eq!(first.values(), &[0.0, 3.0]);
        let HeValue::Plain(last) = &t.values()[5] else {
            panic!("plain tensor holds plaintexts");
        };
        assert_eq!(last.values(), &[8.0, 11.0]);

        let lanes: Vec<Vec<f64>> = t
            .values()
            .iter()
            .map(|v| match v {
                HeValue::Plain(p) => p.values().to_vec(),
                HeValue::Cipher(_) => unreachable!(),
            })
            .collect();
        assert_eq!(unbatch_lanes(&lanes, &[4, 3], 2), data);
    }

    #[test]
    fn overflowing_shape_is_an_error() {
        let err = HeTensor::new(ElementType::F32, vec![1 << 40, 1 << 40], 1, Vec::new())
            .unwrap_err();
        assert!(matches!(err, ExecError::ShapeOverflow(_)));
    }

    #[test]
    fn rejects_bad_batching() {
        assert!(HeTensor::plain(ElementType::F32, vec![3, 2], 2, &[0.0; 6]).is_err());
        assert!(HeTensor::plain(ElementType::F32, vec![], 2, &[0.0]).is_err());
        assert!(HeTensor::plain(ElementType::F32, vec![2], 0, &[0.0; 2]).is_err());
        assert!(matches!(
            HeTensor::plain(ElementType::F32, vec![2], 1, &[0.0; 3]),
            Err(ExecError::ValueCount(3))
        ));
    }

    #[test]
    fn scalar_tensor() {
        let t = HeTensor::plain(ElementType::F64, vec![], 1, &[4.5]).unwrap();
        assert_eq!(t.values().len(), 1);
        assert_eq!(t.packed_shape(), Vec::<usize>::new());
    }
}

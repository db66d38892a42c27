use arrow::array::{Array, ArrayRef, AsArray, Float64Array, Int32Array, Int64Array};
use arrow::compute::cast;
use arrow::compute::kernels::aggregate;
use arrow::compute::kernels::cmp::lt;
use arrow::datatypes::{DataType, Int64Type};
use arrow::record_batch::RecordBatch;
use arrow_array::BooleanArray;

use crate::storage::{Error, Result};

/// Numeric column of a bucket's batch, viewed for aggregation.
pub enum NumericColumn<'a> {
    Float64(&'a Float64Array),
    Int64(&'a Int64Array),
    Int32(&'a Int32Array),
}

impl<'a> NumericColumn<'a> {
    pub fn from_batch(batch: &'a RecordBatch, name: &str) -> Result<Self> {
        let array = batch
            .column_by_name(name)
            .ok_or_else(|| Error::CorruptSegment(format!("missing column {name}")))?;
        downcast_arr(array)
    }

    /// Integer columns are summed in checked i64, so a bucket of large
    /// Int32 values cannot wrap.
    pub fn sum(&self) -> Result<Option<f64>> {
        match self {
            NumericColumn::Float64(arr) => Ok(aggregate::sum(*arr)),
            NumericColumn::Int64(arr) => Ok(aggregate::sum_checked(*arr)?.map(|v| v as f64)),
            NumericColumn::Int32(arr) => {
                let widened = cast(*arr, &DataType::Int64)?;
                let sum = aggregate::sum_checked(widened.as_primitive::<Int64Type>())?;
                Ok(sum.map(|v| v as f64))
            }
        }
    }

    /// Mean over non-null values, `None` when every value is null.
    pub fn mean(&self) -> Result<Option<f64>> {
        let valid = self.valid_count();
        if valid == 0 {
            return Ok(None);
        }
        Ok(self.sum()?.map(|s| s / valid as f64))
    }

    pub fn min(&self) -> Option<f64> {
        match self {
            NumericColumn::Float64(arr) => aggregate::min(*arr),
            NumericColumn::Int64(arr) => aggregate::min(*arr).map(|v| v as f64),
            NumericColumn::Int32(arr) => aggregate::min(*arr).map(|v| v as f64),
        }
    }

    pub fn max(&self) -> Option<f64> {
        match self {
            NumericColumn::Float64(arr) => aggregate::max(*arr),
            NumericColumn::Int64(arr) => aggregate::max(*arr).map(|v| v as f64),
            NumericColumn::Int32(arr) => aggregate::max(*arr).map(|v| v as f64),
        }
    }

    pub fn valid_count(&self) -> usize {
        match self {
            NumericColumn::Float64(arr) => arr.len() - arr.null_count(),
            NumericColumn::Int64(arr) => arr.len() - arr.null_count(),
            NumericColumn::Int32(arr) => arr.len() - arr.null_count(),
        }
    }
}

/// Statistics over a non-empty bucket are always present.
pub fn required<T>(value: Option<T>, name: &str) -> Result<T> {
    value.ok_or_else(|| Error::CorruptSegment(format!("column {name} has no values")))
}

/// Integer min/max keep their column type in rollup rows.
pub fn int32_min_max(batch: &RecordBatch, name: &str) -> Result<(Option<i32>, Option<i32>)> {
    match NumericColumn::from_batch(batch, name)? {
        NumericColumn::Int32(arr) => Ok((aggregate::min(arr), aggregate::max(arr))),
        _ => Err(Error::CorruptSegment(format!("column {name} is not Int32"))),
    }
}

/// Number of rows whose Int32 column `name` is strictly below `threshold`.
pub fn count_below(batch: &RecordBatch, name: &str, threshold: i32) -> Result<usize> {
    let NumericColumn::Int32(arr) = NumericColumn::from_batch(batch, name)? else {
        return Err(Error::CorruptSegment(format!("column {name} is not Int32")));
    };
    let mask: BooleanArray = lt(arr, &Int32Array::new_scalar(threshold))?;
    Ok(mask.true_count())
}

pub fn downcast_arr(array_ref: &ArrayRef) -> Result<NumericColumn<'_>> {
    let type_error = |ty: &str| Error::CorruptSegment(format!("Failed to downcast to {ty}"));
    match array_ref.data_type() {
        DataType::Float64 => array_ref
            .as_any()
            .downcast_ref::<Float64Array>()
            .map(NumericColumn::Float64)
            .ok_or_else(|| type_error("Float64Array")),
        DataType::Int64 => array_ref
            .as_any()
            .downcast_ref::<Int64Array>()
            .map(NumericColumn::Int64)
            .ok_or_else(|| type_error("Int64Array")),
        DataType::Int32 => array_ref
            .as_any()
            .downcast_ref::<Int32Array>()
            .map(NumericColumn::Int32)
            .ok_or_else(|| type_error("Int32Array")),
        other => Err(Error::CorruptSegment(format!(
            "Unsupported data type for aggregation: {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int32_mean_does_not_wrap() {
        let arr = Int32Array::from(vec![2_000_000_000, 2_000_000_000, 2_000_000_000]);
        let column = NumericColumn::Int32(&arr);
        assert_eq!(column.sum().unwrap(), Some(6_000_000_000.0));
        assert_eq!(column.mean().unwrap(), Some(2_000_000_000.0));
    }

    #[test]
    fn test_bucket_sum_past_i32_max() {
        let arr = Int32Array::from(vec![100_000_000; 22]);
        assert_eq!(NumericColumn::Int32(&arr).mean().unwrap(), Some(100_000_000.0));
    }

    #[test]
    fn test_int64_overflow_is_an_error() {
        let arr = Int64Array::from(vec![i64::MAX, 1]);
        assert!(NumericColumn::Int64(&arr).sum().is_err());
    }

    #[test]
    fn test_mean_skips_nulls() {
        let arr = Float64Array::from(vec![Some(1.0), None, Some(3.0)]);
        assert_eq!(NumericColumn::Float64(&arr).mean().unwrap(), Some(2.0));

        let empty = Float64Array::from(vec![None::<f64>, None]);
        assert_eq!(NumericColumn::Float64(&empty).mean().unwrap(), None);
    }
}

//! Index arithmetic and searches shared by the list polyfills.

use crate::error::BridgeError;
use crate::host::HostValue;

/// Largest length a script array may have.
pub const MAX_LENGTH: usize = u32::MAX as usize;

/// Largest number of `Null` slots one write may append past the end of a list.
pub const MAX_GROWTH: usize = 1 << 20;

/// Resolves a possibly negative index against `length`, adding the length once.
///
/// Returns `None` when the index is still out of range.
pub fn normalize_index(index: i64, length: usize) -> Option<usize> {
    let index = if index < 0 { index + length as i64 } else { index };
    if index < 0 || index >= length as i64 { None } else { Some(index as usize) }
}

/// Resolves a relative start position, clamping into `0..=length`.
pub fn clamp_relative(index: i64, length: usize) -> usize {
    let index = if index < 0 { index + length as i64 } else { index };
    index.clamp(0, length as i64) as usize
}

/// Resolves an end position. A missing end, or one that resolves to 0, means `length`.
pub fn end_index(index: Option<i64>, length: usize) -> usize {
    match clamp_relative(index.unwrap_or(0), length) {
        0 => length,
        end => end,
    }
}

fn numeric(value: &HostValue) -> Option<f64> {
    match value {
        HostValue::BigInt(_) => None,
        other => other.as_f64(),
    }
}

/// `===` over host values: numbers compare by value across widths, NaN never matches.
pub fn strict_equals(a: &HostValue, b: &HostValue) -> bool {
    match (numeric(a), numeric(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// SameValueZero: like [`strict_equals`] except that NaN matches NaN.
pub fn same_value_zero(a: &HostValue, b: &HostValue) -> bool {
    match (numeric(a), numeric(b)) {
        (Some(x), Some(y)) => x == y || (x.is_nan() && y.is_nan()),
        _ => a == b,
    }
}

pub fn includes(list: &[HostValue], element: &HostValue, from_index: i64) -> bool {
    let start = clamp_relative(from_index, list.len());
    list[start..].iter().any(|item| same_value_zero(item, element))
}

pub fn index_of(list: &[HostValue], element: &HostValue, from_index: i64) -> Option<usize> {
    let start = clamp_relative(from_index, list.len());
    list[start..].iter().position(|item| strict_equals(item, element)).map(|i| i + start)
}

pub fn last_index_of(list: &[HostValue], element: &HostValue, from_index: Option<i64>) -> Option<usize> {
    if list.is_empty() {
        return None;
    }
    let start = match from_index {
        None => list.len() - 1,
        Some(index) if index < 0 => {
            let index = index + list.len() as i64;
            if index < 0 {
                return None;
            }
            index as usize
        }
        Some(index) => (index as usize).min(list.len() - 1),
    };
    (0..=start).rev().find(|&i| strict_equals(&list[i], element))
}

pub fn pop(list: &mut Vec<HostValue>) -> Option<HostValue> {
    list.pop()
}

/// Appends `items` and returns the new length.
pub fn push(list: &mut Vec<HostValue>, items: Vec<HostValue>) -> usize {
    list.extend(items);
    list.len()
}

pub fn shift(list: &mut Vec<HostValue>) -> Option<HostValue> {
    if list.is_empty() { None } else { Some(list.remove(0)) }
}

/// Prepends `items` in order and returns the new length.
pub fn unshift(list: &mut Vec<HostValue>, items: Vec<HostValue>) -> usize {
    list.splice(0..0, items);
    list.len()
}

/// Sets the length of `list`, padding with `Null` when it grows.
///
/// Returns the truncated tail, or `None` when `length` is not a valid array length or would
/// append more than `MAX_GROWTH` slots. Allocation failure is an error rather than an abort.
pub fn resize(list: &mut Vec<HostValue>, length: usize) -> Result<Option<Vec<HostValue>>, BridgeError> {
    if length <= list.len() {
        return Ok(Some(list.split_off(length)));
    }
    let growth = length - list.len();
    if length > MAX_LENGTH || growth > MAX_GROWTH {
        return Ok(None);
    }
    list.try_reserve(growth)
        .map_err(|e| BridgeError::converter(format!("cannot grow list to {length} items: {e}")))?;
    list.resize(length, HostValue::Null);
    Ok(Some(Vec::new()))
}

/// Copies `start..end` onto `target..`, stopping at the end of the list.
pub fn copy_within(list: &mut [HostValue], target: usize, start: usize, end: usize) {
    if start >= end || target >= list.len() {
        return;
    }
    let chunk: Vec<HostValue> = list[start..end].to_vec();
    for (offset, item) in chunk.into_iter().enumerate() {
        match list.get_mut(target + offset) {
            Some(slot) => *slot = item,
            None => break,
        }
    }
}

pub fn fill(list: &mut [HostValue], value: &HostValue, start: usize, end: usize) {
    for slot in list.iter_mut().take(end).skip(start) {
        *slot = value.clone();
    }
}

/// Flattens nested lists and object arrays up to `depth` levels.
pub fn flat(list: &[HostValue], depth: usize) -> Vec<HostValue> {
    let mut result = Vec::new();
    for item in list {
        match item {
            HostValue::List(inner) if depth > 0 => result.extend(flat(&inner.borrow(), depth - 1)),
            HostValue::Array(inner) if depth > 0 => result.extend(flat(&inner.to_values(), depth - 1)),
            other => result.push(other.clone()),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i32]) -> Vec<HostValue> {
        values.iter().map(|v| HostValue::Integer(*v)).collect()
    }

    #[test]
    fn test_normalize_index() {
        assert_eq!(normalize_index(-1, 3), Some(2));
        assert_eq!(normalize_index(-4, 3), None);
        assert_eq!(normalize_index(3, 3), None);
        assert_eq!(normalize_index(0, 0), None);
    }

    #[test]
    fn test_end_index_zero_means_length() {
        assert_eq!(end_index(Some(0), 5), 5);
        assert_eq!(end_index(None, 5), 5);
        assert_eq!(end_index(Some(-5), 5), 5);
        assert_eq!(end_index(Some(-1), 5), 4);
        assert_eq!(end_index(Some(9), 5), 5);
    }

    #[test]
    fn test_searches() {
        let list = ints(&[1, 2, 3, 2]);
        assert!(includes(&list, &HostValue::Double(2.0), 0));
        assert!(!includes(&list, &HostValue::Integer(1), 1));
        assert!(includes(&list, &HostValue::Integer(1), -10));
        assert_eq!(index_of(&list, &HostValue::Integer(2), 0), Some(1));
        assert_eq!(index_of(&list, &HostValue::Integer(2), 2), Some(3));
        assert_eq!(last_index_of(&list, &HostValue::Integer(2), None), Some(3));
        assert_eq!(last_index_of(&list, &HostValue::Integer(2), Some(2)), Some(1));
        assert_eq!(last_index_of(&list, &HostValue::Integer(2), Some(-10)), None);
        assert!(includes(&[HostValue::Double(f64::NAN)], &HostValue::Double(f64::NAN), 0));
        assert_eq!(index_of(&[HostValue::Double(f64::NAN)], &HostValue::Double(f64::NAN), 0), None);
    }

    #[test]
    fn test_mutators() {
        let mut list = ints(&[1, 2]);
        assert_eq!(push(&mut list, ints(&[3])), 3);
        assert_eq!(unshift(&mut list, ints(&[-1, 0])), 5);
        assert_eq!(list, ints(&[-1, 0, 1, 2, 3]));
        assert_eq!(shift(&mut list), Some(HostValue::Integer(-1)));
        assert_eq!(pop(&mut list), Some(HostValue::Integer(3)));
        assert_eq!(list, ints(&[0, 1, 2]));
        assert_eq!(shift(&mut Vec::new()), None);
    }

    #[test]
    fn test_copy_within_and_fill() {
        let mut list = ints(&[1, 2, 3, 4, 5]);
        copy_within(&mut list, 0, 3, 5);
        assert_eq!(list, ints(&[4, 5, 3, 4, 5]));
        let mut list = ints(&[1, 2, 3, 4, 5]);
        copy_within(&mut list, 3, 0, 5);
        assert_eq!(list, ints(&[1, 2, 3, 1, 2]));
        fill(&mut list, &HostValue::Integer(0), 1, 3);
        assert_eq!(list, ints(&[1, 0, 0, 1, 2]));
    }

    #[test]
    fn test_resize_is_bounded() {
        let mut list = ints(&[1, 2, 3]);
        assert_eq!(resize(&mut list, 1).unwrap(), Some(ints(&[2, 3])));
        assert_eq!(resize(&mut list, 3).unwrap(), Some(Vec::new()));
        assert_eq!(list, vec![HostValue::Integer(1), HostValue::Null, HostValue::Null]);
        assert_eq!(resize(&mut list, MAX_LENGTH + 1).unwrap(), None);
        assert_eq!(resize(&mut list, MAX_LENGTH - 1).unwrap(), None);
        assert_eq!(resize(&mut list, 3 + MAX_GROWTH + 1).unwrap(), None);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_flat() {
        let nested = vec![
            HostValue::Integer(1),
            HostValue::list(vec![HostValue::Integer(2), HostValue::list(ints(&[3]))]),
        ];
        assert_eq!(flat(&nested, 1), vec![HostValue::Integer(1), HostValue::Integer(2), HostValue::list(ints(&[3]))]);
        assert_eq!(flat(&nested, 2), ints(&[1, 2, 3]));
    }
}

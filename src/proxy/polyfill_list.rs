//! `Array.prototype` look-alikes for proxied host lists.
//!
//! Every method reads and writes the live backing list. Callbacks run against a snapshot taken
//! when the method is entered, so a callback mutating the list does not disturb the walk.

use crate::core::{Engine, EngineValue, Scope};
use crate::error::BridgeError;
use crate::host::{HostValue, Shared, release_handles};
use crate::list_utils;
use crate::proxy::{IteratorKind, IteratorSource, PolyfillFn, argument, iterator_function, new_engine_array, new_function, release_after};
use crate::proxy::{to_engine, to_host, to_host_args};
use std::rc::Rc;

type List = Shared<Vec<HostValue>>;

pub fn lookup(name: &str) -> Option<PolyfillFn> {
    let polyfill: PolyfillFn = match name {
        "at" => at,
        "concat" => concat,
        "copyWithin" => copy_within,
        "entries" => entries,
        "every" => every,
        "fill" => fill,
        "filter" => filter,
        "flat" => flat,
        "forEach" => for_each,
        "includes" => includes,
        "indexOf" => index_of,
        "keys" => keys,
        "lastIndexOf" => last_index_of,
        "length" => length,
        "map" => map,
        "pop" => pop,
        "push" => push,
        "reverse" => reverse,
        "shift" => shift,
        "some" => some,
        "toJSON" => to_json,
        "toReversed" => to_reversed,
        "unshift" => unshift,
        "values" => values,
        "with" => with,
        _ => return None,
    };
    Some(polyfill)
}

fn list_of(target: &HostValue) -> Result<List, BridgeError> {
    match target {
        HostValue::List(list) => Ok(list.clone()),
        other => Err(BridgeError::not_supported(format!("host {} is not a list", other.type_label()))),
    }
}

fn method<F>(engine: &dyn Engine, target: &HostValue, name: &str, body: F) -> Result<EngineValue, BridgeError>
where
    F: Fn(&dyn Engine, &List, &EngineValue, &[EngineValue]) -> Result<EngineValue, BridgeError> + 'static,
{
    let list = list_of(target)?;
    new_function(
        engine,
        name,
        Rc::new(move |engine: &dyn Engine, this: &EngineValue, args: &[EngineValue]| body(engine, &list, this, args)),
    )
}

fn index_argument(args: &[EngineValue], index: usize) -> Option<i64> {
    argument(args, index).to_integer_or_infinity()
}

fn snapshot(list: &List) -> Vec<HostValue> {
    list.borrow().clone()
}

/// Restores one handle per passthrough slot after an in-place edit: a handle now held by
/// several slots is duplicated, and a `displaced` handle no slot holds any more is released.
fn rebalance_handles(engine: &dyn Engine, displaced: &[HostValue], list: &mut [HostValue]) -> Result<(), BridgeError> {
    let mut held: Vec<EngineValue> = Vec::new();
    for slot in list.iter_mut() {
        let Some(handle) = slot.passthrough_handle().cloned() else {
            continue;
        };
        if held.contains(&handle) {
            *slot = slot.duplicate_handle(engine)?;
        } else {
            held.push(handle);
        }
    }
    let dropped = displaced.iter().filter(|value| value.passthrough_handle().is_some_and(|handle| !held.contains(handle)));
    release_handles(engine, dropped)
}

/// Calls the callback argument as `(item, index, list)` for each item until `visit` returns false.
fn for_each_item(
    engine: &dyn Engine,
    items: &[HostValue],
    this: &EngineValue,
    args: &[EngineValue],
    mut visit: impl FnMut(usize, &EngineValue) -> Result<bool, BridgeError>,
) -> Result<(), BridgeError> {
    let callback = argument(args, 0);
    if !engine.is_callable(callback) {
        return Err(BridgeError::not_supported("callback is not a function"));
    }
    let this_arg = argument(args, 1);
    for (index, item) in items.iter().enumerate() {
        let mut scope = Scope::new(engine);
        let value = scope.add(to_engine(engine, item)?);
        let result = engine.call(callback, this_arg, &[value, EngineValue::Integer(index as i32), this.clone()])?;
        let keep_going = visit(index, &result);
        engine.release(&result)?;
        if !keep_going? {
            break;
        }
    }
    Ok(())
}

fn at(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "at", |engine, list, _, args| {
        let list = list.borrow();
        match list_utils::normalize_index(index_argument(args, 0).unwrap_or(0), list.len()) {
            Some(index) => {
                let item = list[index].clone();
                drop(list);
                to_engine(engine, &item)
            }
            None => Ok(EngineValue::Undefined),
        }
    })
}

fn concat(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "concat", |engine, list, _, args| {
        let mut items = snapshot(list);
        // Converted arguments that no host list shares; their handles die with this call.
        let mut temporaries = Vec::new();
        for arg in args {
            match to_host(engine, arg)? {
                HostValue::List(other) => {
                    let other_items = other.borrow().clone();
                    if Rc::strong_count(&other) == 1 {
                        temporaries.extend(other_items.iter().cloned());
                    }
                    items.extend(other_items);
                }
                HostValue::Array(other) => items.extend(other.to_values()),
                other => {
                    temporaries.push(other.clone());
                    items.push(other);
                }
            }
        }
        release_after(engine, new_engine_array(engine, &items), &temporaries)
    })
}

fn copy_within(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "copyWithin", |engine, list, this, args| {
        {
            let mut list = list.borrow_mut();
            let length = list.len();
            let to = list_utils::clamp_relative(index_argument(args, 0).unwrap_or(0), length);
            let start = list_utils::clamp_relative(index_argument(args, 1).unwrap_or(0), length);
            let end = list_utils::end_index(index_argument(args, 2), length);
            let displaced = list.clone();
            list_utils::copy_within(&mut list, to, start, end);
            rebalance_handles(engine, &displaced, &mut list)?;
        }
        engine.duplicate(this)
    })
}

fn entries(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    iterator_function(engine, IteratorSource::List(list_of(target)?), IteratorKind::Entries, "entries")
}

fn every(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "every", |engine, list, this, args| {
        let items = snapshot(list);
        let mut all = true;
        for_each_item(engine, &items, this, args, |_, result| {
            all = result.is_truthy();
            Ok(all)
        })?;
        Ok(EngineValue::Boolean(all))
    })
}

fn fill(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "fill", |engine, list, this, args| {
        let value = to_host(engine, argument(args, 0))?;
        {
            let mut list = list.borrow_mut();
            let length = list.len();
            let start = list_utils::clamp_relative(index_argument(args, 1).unwrap_or(0), length);
            let end = list_utils::end_index(index_argument(args, 2), length);
            let mut displaced = list.clone();
            list_utils::fill(&mut list, &value, start, end);
            displaced.push(value);
            rebalance_handles(engine, &displaced, &mut list)?;
        }
        engine.duplicate(this)
    })
}

fn filter(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "filter", |engine, list, this, args| {
        let items = snapshot(list);
        let mut kept = Vec::new();
        for_each_item(engine, &items, this, args, |index, result| {
            if result.is_truthy() {
                kept.push(items[index].clone());
            }
            Ok(true)
        })?;
        new_engine_array(engine, &kept)
    })
}

fn flat(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "flat", |engine, list, _, args| {
        let depth = index_argument(args, 0).unwrap_or(1).max(0) as usize;
        let items = list_utils::flat(&list.borrow(), depth);
        new_engine_array(engine, &items)
    })
}

fn for_each(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "forEach", |engine, list, this, args| {
        let items = snapshot(list);
        for_each_item(engine, &items, this, args, |_, _| Ok(true))?;
        Ok(EngineValue::Undefined)
    })
}

fn includes(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "includes", |engine, list, _, args| {
        let element = to_host(engine, argument(args, 0))?;
        let found = list_utils::includes(&list.borrow(), &element, index_argument(args, 1).unwrap_or(0));
        element.release_handle(engine)?;
        Ok(EngineValue::Boolean(found))
    })
}

fn index_of(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "indexOf", |engine, list, _, args| {
        let element = to_host(engine, argument(args, 0))?;
        let index = list_utils::index_of(&list.borrow(), &element, index_argument(args, 1).unwrap_or(0));
        element.release_handle(engine)?;
        Ok(EngineValue::Integer(index.map_or(-1, |i| i as i32)))
    })
}

fn keys(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "keys", |engine, list, _, _| {
        let indices: Vec<HostValue> = (0..list.borrow().len()).map(|i| HostValue::Integer(i as i32)).collect();
        new_engine_array(engine, &indices)
    })
}

fn last_index_of(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "lastIndexOf", |engine, list, _, args| {
        let element = to_host(engine, argument(args, 0))?;
        let index = list_utils::last_index_of(&list.borrow(), &element, index_argument(args, 1));
        element.release_handle(engine)?;
        Ok(EngineValue::Integer(index.map_or(-1, |i| i as i32)))
    })
}

fn length(_engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    Ok(EngineValue::Integer(list_of(target)?.borrow().len() as i32))
}

fn map(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "map", |engine, list, this, args| {
        let items = snapshot(list);
        let mut mapped = Vec::with_capacity(items.len());
        let outcome = for_each_item(engine, &items, this, args, |_, result| {
            mapped.push(to_host(engine, result)?);
            Ok(true)
        });
        match outcome {
            Ok(()) => release_after(engine, new_engine_array(engine, &mapped), &mapped),
            Err(error) => {
                release_handles(engine, &mapped)?;
                Err(error)
            }
        }
    })
}

fn pop(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "pop", |engine, list, _, _| {
        let item = list_utils::pop(&mut list.borrow_mut());
        match item {
            Some(item) => release_after(engine, to_engine(engine, &item), std::slice::from_ref(&item)),
            None => Ok(EngineValue::Undefined),
        }
    })
}

fn push(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "push", |engine, list, _, args| {
        let items = to_host_args(engine, args)?;
        let length = list_utils::push(&mut list.borrow_mut(), items);
        Ok(EngineValue::Integer(length as i32))
    })
}

fn reverse(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "reverse", |engine, list, this, _| {
        list.borrow_mut().reverse();
        engine.duplicate(this)
    })
}

fn shift(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "shift", |engine, list, _, _| {
        let item = list_utils::shift(&mut list.borrow_mut());
        match item {
            Some(item) => release_after(engine, to_engine(engine, &item), std::slice::from_ref(&item)),
            None => Ok(EngineValue::Undefined),
        }
    })
}

fn some(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "some", |engine, list, this, args| {
        let items = snapshot(list);
        let mut any = false;
        for_each_item(engine, &items, this, args, |_, result| {
            any = result.is_truthy();
            Ok(!any)
        })?;
        Ok(EngineValue::Boolean(any))
    })
}

fn to_json(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "toJSON", |engine, list, _, _| new_engine_array(engine, &snapshot(list)))
}

fn to_reversed(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "toReversed", |engine, list, _, _| {
        let mut items = snapshot(list);
        items.reverse();
        new_engine_array(engine, &items)
    })
}

fn unshift(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "unshift", |engine, list, _, args| {
        let items = to_host_args(engine, args)?;
        let length = list_utils::unshift(&mut list.borrow_mut(), items);
        Ok(EngineValue::Integer(length as i32))
    })
}

fn values(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    iterator_function(engine, IteratorSource::List(list_of(target)?), IteratorKind::Values, "values")
}

fn with(engine: &dyn Engine, target: &HostValue) -> Result<EngineValue, BridgeError> {
    method(engine, target, "with", |engine, list, _, args| {
        let value = to_host(engine, argument(args, 1))?;
        let mut items = snapshot(list);
        if let Some(index) = list_utils::normalize_index(index_argument(args, 0).unwrap_or(0), items.len()) {
            items[index] = value.clone();
        }
        release_after(engine, new_engine_array(engine, &items), &[value])
    })
}

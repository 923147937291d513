use crate::input::ParamType;
use rand::Rng;
use serde_json::{Map, Number as JsonNumber, Value};

/// Default cap on recursion into nested objects/arrays.
const DEFAULT_MAX_MUTATION_DEPTH: usize = 10;
/// Chance of descending into one member of a container instead of applying a
/// structural mutation to the container itself.
const CONTAINER_RECURSE_PROBABILITY: f64 = 0.5;
/// Target length for the fill-to-large array strategy.
const ARRAY_FILL_LEN: usize = 64;

/// A `Mutator` derives a new candidate input from an existing value.
///
/// Implementations must change exactly one field or value per call, so that
/// a coverage or crash delta stays attributable to a single input change.
pub trait Mutator<R: Rng + ?Sized> {
    fn mutate(&mut self, input: &Value, rng: &mut R) -> Result<Value, anyhow::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StringMutation {
    Append,
    Truncate,
    Duplicate,
    CharReplace,
    NullByte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumberMutation {
    Increment,
    Decrement,
    Double,
    Halve,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayMutation {
    Append,
    DropLast,
    SelfConcat,
    Empty,
    FillLarge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectMutation {
    AddField,
    RemoveField,
    TypeSwap,
}

/// Type-directed single-step mutation engine.
///
/// Each value kind carries its own strategy table; the kind of the incoming
/// value selects the table, and the rng selects one strategy from it. Nested
/// containers are handled by descending into exactly one member, so the
/// one-change-per-step invariant holds at any depth.
#[derive(Debug, Clone, Copy)]
pub struct TypeDirectedMutator {
    max_depth: usize,
}

impl TypeDirectedMutator {
    pub fn new() -> Self {
        Self {
            max_depth: DEFAULT_MAX_MUTATION_DEPTH,
        }
    }

    fn mutate_string<R: Rng + ?Sized>(s: &str, rng: &mut R) -> String {
        let strategy = match rng.random_range(0..5u8) {
            0 => StringMutation::Append,
            1 => StringMutation::Truncate,
            2 => StringMutation::Duplicate,
            3 => StringMutation::CharReplace,
            _ => StringMutation::NullByte,
        };
        let mut chars: Vec<char> = s.chars().collect();
        // Every strategy except Append needs at least one char to work on.
        let strategy = if chars.is_empty() {
            StringMutation::Append
        } else {
            strategy
        };
        match strategy {
            StringMutation::Append => {
                chars.push(rng.random_range(32u8..127u8) as char);
            }
            StringMutation::Truncate => {
                chars.pop();
            }
            StringMutation::Duplicate => {
                let copy = chars.clone();
                chars.extend(copy);
            }
            StringMutation::CharReplace => {
                let idx = rng.random_range(0..chars.len());
                chars[idx] = rng.random_range(32u8..127u8) as char;
            }
            StringMutation::NullByte => {
                let idx = rng.random_range(0..=chars.len());
                chars.insert(idx, '\0');
            }
        }
        chars.into_iter().collect()
    }

    fn mutate_number<R: Rng + ?Sized>(n: &JsonNumber, rng: &mut R) -> JsonNumber {
        let strategy = match rng.random_range(0..5u8) {
            0 => NumberMutation::Increment,
            1 => NumberMutation::Decrement,
            2 => NumberMutation::Double,
            3 => NumberMutation::Halve,
            _ => NumberMutation::Negate,
        };
        if let Some(v) = n.as_i64() {
            let mutated = match strategy {
                NumberMutation::Increment => v.saturating_add(1),
                NumberMutation::Decrement => v.saturating_sub(1),
                NumberMutation::Double => v.saturating_mul(2),
                NumberMutation::Halve => v / 2,
                NumberMutation::Negate => v.checked_neg().unwrap_or(i64::MAX),
            };
            return JsonNumber::from(mutated);
        }
        let v = n.as_f64().unwrap_or(0.0);
        let mutated = match strategy {
            NumberMutation::Increment => v + 1.0,
            NumberMutation::Decrement => v - 1.0,
            NumberMutation::Double => v * 2.0,
            NumberMutation::Halve => v / 2.0,
            NumberMutation::Negate => -v,
        };
        if mutated.is_finite() {
            JsonNumber::from_f64(mutated).unwrap_or_else(|| JsonNumber::from(0))
        } else {
            JsonNumber::from(0)
        }
    }

    fn mutate_array<R: Rng + ?Sized>(&self, arr: &[Value], rng: &mut R, depth: usize) -> Vec<Value> {
        let mut out = arr.to_vec();
        if !out.is_empty()
            && depth < self.max_depth
            && rng.random_bool(CONTAINER_RECURSE_PROBABILITY)
        {
            let idx = rng.random_range(0..out.len());
            let mutated = self.mutate_value(&out[idx], rng, depth + 1);
            out[idx] = mutated;
            return out;
        }
        let strategy = match rng.random_range(0..5u8) {
            0 => ArrayMutation::Append,
            1 => ArrayMutation::DropLast,
            2 => ArrayMutation::SelfConcat,
            3 => ArrayMutation::Empty,
            _ => ArrayMutation::FillLarge,
        };
        match strategy {
            ArrayMutation::Append => {
                let element = out.last().cloned().unwrap_or_else(|| Value::from(0));
                out.push(element);
            }
            ArrayMutation::DropLast => {
                out.pop();
            }
            ArrayMutation::SelfConcat => {
                let copy = out.clone();
                out.extend(copy);
            }
            ArrayMutation::Empty => {
                out.clear();
            }
            ArrayMutation::FillLarge => {
                let filler = out.first().cloned().unwrap_or_else(|| Value::from(0));
                out.resize(ARRAY_FILL_LEN, filler);
            }
        }
        out
    }

    fn mutate_object<R: Rng + ?Sized>(
        &self,
        map: &Map<String, Value>,
        rng: &mut R,
        depth: usize,
    ) -> Map<String, Value> {
        let mut out = map.clone();
        if !out.is_empty()
            && depth < self.max_depth
            && rng.random_bool(CONTAINER_RECURSE_PROBABILITY)
        {
            let keys: Vec<String> = out.keys().cloned().collect();
            let key = &keys[rng.random_range(0..keys.len())];
            if let Some(value) = out.get(key) {
                let mutated = self.mutate_value(value, rng, depth + 1);
                out.insert(key.clone(), mutated);
            }
            return out;
        }
        let strategy = match rng.random_range(0..3u8) {
            0 => ObjectMutation::AddField,
            1 => ObjectMutation::RemoveField,
            _ => ObjectMutation::TypeSwap,
        };
        match strategy {
            ObjectMutation::AddField => {
                let key = format!("fld_{}", rng.random_range(0..10_000u32));
                out.insert(key, Value::from(0));
            }
            ObjectMutation::RemoveField => {
                let keys: Vec<String> = out.keys().cloned().collect();
                if let Some(key) = keys.get(rng.random_range(0..keys.len().max(1))) {
                    out.remove(key);
                }
            }
            ObjectMutation::TypeSwap => {
                let keys: Vec<String> = out.keys().cloned().collect();
                if !keys.is_empty() {
                    let key = &keys[rng.random_range(0..keys.len())];
                    let swapped = match out.get(key).and_then(ParamType::of) {
                        Some(ParamType::String) => Value::from(0),
                        Some(ParamType::Number) => Value::String("0".to_string()),
                        Some(ParamType::Boolean) => Value::from(1),
                        Some(ParamType::Object) => Value::Array(Vec::new()),
                        Some(ParamType::Array) => Value::Object(Map::new()),
                        None => Value::Bool(true),
                    };
                    out.insert(key.clone(), swapped);
                }
            }
        }
        out
    }

    fn mutate_value<R: Rng + ?Sized>(&self, value: &Value, rng: &mut R, depth: usize) -> Value {
        match value {
            Value::String(s) => Value::String(Self::mutate_string(s, rng)),
            Value::Number(n) => Value::Number(Self::mutate_number(n, rng)),
            Value::Bool(b) => Value::Bool(!b),
            Value::Array(arr) => Value::Array(self.mutate_array(arr, rng, depth)),
            Value::Object(map) => Value::Object(self.mutate_object(map, rng, depth)),
            // Null carries no structure to vary; promote it to a number.
            Value::Null => Value::from(0),
        }
    }
}

impl Default for TypeDirectedMutator {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng + ?Sized> Mutator<R> for TypeDirectedMutator {
    fn mutate(&mut self, input: &Value, rng: &mut R) -> Result<Value, anyhow::Error> {
        Ok(self.mutate_value(input, rng, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;
    use serde_json::json;

    #[test]
    fn string_mutation_reaches_duplication() {
        let mut mutator = TypeDirectedMutator::new();
        let mut rng = ChaCha8Rng::from_seed([7u8; 32]);
        let base = json!("ab");

        let mut saw_doubled = false;
        for _ in 0..200 {
            let mutated = mutator.mutate(&base, &mut rng).unwrap();
            if mutated.as_str().map(|s| s.len()) == Some(4) {
                saw_doubled = true;
                break;
            }
        }
        assert!(saw_doubled, "duplication strategy should fire within 200 draws");
    }

    #[test]
    fn empty_string_mutation_appends() {
        let mut mutator = TypeDirectedMutator::new();
        let mut rng = ChaCha8Rng::from_seed([1u8; 32]);
        for _ in 0..50 {
            let mutated = mutator.mutate(&json!(""), &mut rng).unwrap();
            let s = mutated.as_str().unwrap();
            assert_eq!(s.chars().count(), 1, "empty string always grows by one char");
        }
    }

    #[test]
    fn number_mutation_changes_value() {
        let mut mutator = TypeDirectedMutator::new();
        let mut rng = ChaCha8Rng::from_seed([2u8; 32]);
        let mut changed = 0;
        for _ in 0..50 {
            let mutated = mutator.mutate(&json!(100), &mut rng).unwrap();
            assert!(mutated.is_number());
            if mutated != json!(100) {
                changed += 1;
            }
        }
        // Halve is the only strategy that can no-op on some inputs; most
        // draws must move the value.
        assert!(changed >= 30, "only {changed} of 50 mutations changed the number");
    }

    #[test]
    fn boolean_mutation_flips() {
        let mut mutator = TypeDirectedMutator::new();
        let mut rng = ChaCha8Rng::from_seed([3u8; 32]);
        assert_eq!(mutator.mutate(&json!(true), &mut rng).unwrap(), json!(false));
        assert_eq!(mutator.mutate(&json!(false), &mut rng).unwrap(), json!(true));
    }

    #[test]
    fn array_strategies_cover_growth_and_emptying() {
        let mut mutator = TypeDirectedMutator::new();
        let mut rng = ChaCha8Rng::from_seed([4u8; 32]);
        let base = json!([1, 2, 3]);

        let mut lengths = std::collections::HashSet::new();
        for _ in 0..300 {
            let mutated = mutator.mutate(&base, &mut rng).unwrap();
            lengths.insert(mutated.as_array().unwrap().len());
        }
        assert!(lengths.contains(&0), "empty-out strategy should appear");
        assert!(lengths.contains(&4), "append strategy should appear");
        assert!(lengths.contains(&6), "self-concat strategy should appear");
        assert!(lengths.contains(&ARRAY_FILL_LEN), "fill-large strategy should appear");
    }

    #[test]
    fn object_mutation_changes_at_most_one_field() {
        let mut mutator = TypeDirectedMutator::new();
        let mut rng = ChaCha8Rng::from_seed([5u8; 32]);
        let base = json!({"name": "x", "count": 3});

        for _ in 0..200 {
            let mutated = mutator.mutate(&base, &mut rng).unwrap();
            let map = mutated.as_object().unwrap();
            let base_map = base.as_object().unwrap();
            let differing = base_map
                .iter()
                .filter(|(k, v)| map.get(*k) != Some(v))
                .count()
                + map.keys().filter(|k| !base_map.contains_key(*k)).count();
            assert!(
                differing <= 1,
                "exactly one field may change per step, saw {differing}: {mutated}"
            );
        }
    }

    #[test]
    fn null_promotes_to_number() {
        let mut mutator = TypeDirectedMutator::new();
        let mut rng = ChaCha8Rng::from_seed([6u8; 32]);
        assert_eq!(mutator.mutate(&Value::Null, &mut rng).unwrap(), json!(0));
    }
}

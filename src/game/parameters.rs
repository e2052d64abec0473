//! Gameplay parameters and the effects which modify them
//!
//! Parameters are the settings of a game (a player's max health, a gun's
//! damage), not its state. Each has a base value and an ordered list of
//! effects, each scoped to a qualifier pattern such as `"1/*"`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use super::error::GameError;
use super::pattern::{glob_match, overlaps};
use super::player::PlayerKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectOp {
    Set,
    Multiply,
    Add,
    Subtract,
}

/// An encoded `<op><digits>` effect value such as `"*2"` or `"=150"`.
///
/// Serializes back to exactly the string it was parsed from, so `"+007"`
/// stays `"+007"` in snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EffectValue {
    pub op: EffectOp,
    pub operand: i64,
    encoded: String,
}

impl EffectValue {
    pub fn apply(&self, value: i64) -> i64 {
        match self.op {
            EffectOp::Set => self.operand,
            EffectOp::Multiply => value.saturating_mul(self.operand),
            EffectOp::Add => value.saturating_add(self.operand),
            EffectOp::Subtract => value.saturating_sub(self.operand),
        }
    }
}

impl FromStr for EffectValue {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || GameError::MalformedValue(s.to_string());

        let mut chars = s.chars();
        let op = match chars.next() {
            Some('=') => EffectOp::Set,
            Some('*') => EffectOp::Multiply,
            Some('+') => EffectOp::Add,
            Some('-') => EffectOp::Subtract,
            _ => return Err(malformed()),
        };
        let digits = chars.as_str();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let operand = digits.parse().map_err(|_| malformed())?;
        Ok(Self {
            op,
            operand,
            encoded: s.to_string(),
        })
    }
}

impl TryFrom<String> for EffectValue {
    type Error = GameError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EffectValue> for String {
    fn from(v: EffectValue) -> Self {
        v.encoded
    }
}

impl fmt::Display for EffectValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Effect {
    #[serde(rename = "qualifierPattern")]
    pub qualifier_pattern: String,
    pub id: String,
    pub value: EffectValue,
}

impl Effect {
    /// Apply to `value` if this effect covers `qualifier`
    pub fn apply(&self, value: i64, qualifier: &str) -> i64 {
        if glob_match(qualifier, &self.qualifier_pattern) {
            self.value.apply(value)
        } else {
            value
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    #[serde(rename = "baseValue")]
    pub base_value: i64,
    pub effects: Vec<Effect>,
}

impl Parameter {
    pub fn new(base_value: i64) -> Self {
        Self {
            base_value,
            effects: Vec::new(),
        }
    }

    /// Fold the base value through every effect, in order
    pub fn value(&self, qualifier: &str) -> i64 {
        self.effects
            .iter()
            .fold(self.base_value, |v, e| e.apply(v, qualifier))
    }
}

pub type ParameterCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone)]
struct Subscription {
    name_pattern: String,
    qualifier_pattern: String,
    callback: ParameterCallback,
}

/// The named parameters of a game.
///
/// Equality and serialization only look at the parameter values, never at
/// subscriptions.
#[derive(Clone, Serialize, Deserialize)]
pub struct Parameters {
    parameters: BTreeMap<String, Parameter>,
    #[serde(skip)]
    subscriptions: Vec<Subscription>,
}

impl Default for Parameters {
    fn default() -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert("player.maxHealth".to_string(), Parameter::new(100));
        parameters.insert("gun.damage".to_string(), Parameter::new(2));
        Self {
            parameters,
            subscriptions: Vec::new(),
        }
    }
}

impl PartialEq for Parameters {
    fn eq(&self, other: &Self) -> bool {
        self.parameters == other.parameters
    }
}

impl fmt::Debug for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameters")
            .field("parameters", &self.parameters)
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parameters.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.parameters.get(name)
    }

    pub fn get_value(&self, name: &str, qualifier: &str) -> Result<i64, GameError> {
        self.parameters
            .get(name)
            .map(|p| p.value(qualifier))
            .ok_or_else(|| GameError::UnknownParameter(name.to_string()))
    }

    /// `player.<name>` for one player
    pub fn get_player_value(&self, name: &str, key: PlayerKey) -> Result<i64, GameError> {
        self.get_value(&format!("player.{name}"), &key.qualifier())
    }

    /// Append an effect. Several effects may share an id.
    pub fn add_effect(
        &mut self,
        name: &str,
        qualifier_pattern: &str,
        id: &str,
        value: &str,
    ) -> Result<(), GameError> {
        self.insert_effect(name, qualifier_pattern, id, value)?;
        self.notify(name, qualifier_pattern);
        Ok(())
    }

    /// Same as [`Parameters::add_effect`] without telling subscribers
    pub(crate) fn insert_effect(
        &mut self,
        name: &str,
        qualifier_pattern: &str,
        id: &str,
        value: &str,
    ) -> Result<(), GameError> {
        let value: EffectValue = value.parse()?;
        let parameter = self
            .parameters
            .get_mut(name)
            .ok_or_else(|| GameError::UnknownParameter(name.to_string()))?;

        parameter.effects.push(Effect {
            qualifier_pattern: qualifier_pattern.to_string(),
            id: id.to_string(),
            value,
        });
        Ok(())
    }

    pub fn add_player_effect(
        &mut self,
        name: &str,
        key: PlayerKey,
        id: &str,
        value: &str,
    ) -> Result<(), GameError> {
        self.add_effect(&format!("player.{name}"), &key.qualifier(), id, value)
    }

    pub fn add_team_effect(
        &mut self,
        name: &str,
        team: u32,
        id: &str,
        value: &str,
    ) -> Result<(), GameError> {
        self.add_effect(&format!("player.{name}"), &format!("{team}/*"), id, value)
    }

    /// Remove the first effect with `id` and return it
    pub fn remove_effect(&mut self, name: &str, id: &str) -> Result<Effect, GameError> {
        let effect = self.take_effect(name, id)?;
        self.notify(name, &effect.qualifier_pattern);
        Ok(effect)
    }

    pub(crate) fn take_effect(&mut self, name: &str, id: &str) -> Result<Effect, GameError> {
        let parameter = self
            .parameters
            .get_mut(name)
            .ok_or_else(|| GameError::UnknownParameter(name.to_string()))?;

        let index = parameter
            .effects
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| GameError::EffectNotFound {
                parameter: name.to_string(),
                id: id.to_string(),
            })?;
        Ok(parameter.effects.remove(index))
    }

    /// Call `callback(name)` whenever an effect on a parameter matching
    /// `name_pattern` changes with a qualifier overlapping `qualifier_pattern`
    pub fn subscribe(
        &mut self,
        name_pattern: &str,
        qualifier_pattern: &str,
        callback: impl Fn(&str) + Send + Sync + 'static,
    ) {
        self.subscriptions.push(Subscription {
            name_pattern: name_pattern.to_string(),
            qualifier_pattern: qualifier_pattern.to_string(),
            callback: Arc::new(callback),
        });
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Take the values from `other` but keep our subscriptions
    pub(crate) fn replace_values(&mut self, other: Parameters) {
        self.parameters = other.parameters;
    }

    fn notify(&self, name: &str, effect_qualifier: &str) {
        for sub in &self.subscriptions {
            if glob_match(name, &sub.name_pattern) && overlaps(effect_qualifier, &sub.qualifier_pattern)
            {
                debug!(parameter = name, qualifier = effect_qualifier, "Parameter changed");
                (sub.callback)(name);
            }
        }
    }

    /// `{"parameters": {name: {"baseValue", "effects": [...]}}}`
    pub fn to_simple_types(&self) -> serde_json::Value {
        serde_json::json!({ "parameters": self.parameters })
    }

    pub fn from_simple_types(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

//! Builders for scripted LLM answers.
//!
//! Each builder produces the JSON object the corresponding extraction task
//! expects, with sensible defaults.

use serde_json::{json, Value};

/// One scene start of a `segment` answer.
pub struct BoundaryBuilder {
    sentence: usize,
    scene_type: String,
    label: String,
    location: Option<String>,
}

impl BoundaryBuilder {
    pub fn new(sentence: usize, label: impl Into<String>) -> Self {
        Self {
            sentence,
            scene_type: "physical".to_string(),
            label: label.into(),
            location: None,
        }
    }

    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn memory(mut self) -> Self {
        self.scene_type = "memory".to_string();
        self
    }

    pub fn build(self) -> Value {
        json!({
            "sentence": self.sentence,
            "scene_type": self.scene_type,
            "label": self.label,
            "location": self.location,
        })
    }
}

/// `segment` answer from boundaries.
pub fn segments(boundaries: Vec<BoundaryBuilder>) -> Value {
    json!({ "boundaries": boundaries.into_iter().map(BoundaryBuilder::build).collect::<Vec<_>>() })
}

/// One beat of a `beats` answer.
pub struct BeatBuilder {
    title: String,
    description: String,
    quote: Option<String>,
    archetype: String,
    participants: Vec<Value>,
    flashback: bool,
    recalls: Option<String>,
}

impl BeatBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            quote: None,
            archetype: "generic".to_string(),
            participants: Vec::new(),
            flashback: false,
            recalls: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn quote(mut self, quote: impl Into<String>) -> Self {
        self.quote = Some(quote.into());
        self
    }

    pub fn archetype(mut self, archetype: &str) -> Self {
        self.archetype = archetype.to_string();
        self
    }

    pub fn participant(mut self, name: &str, kind: &str) -> Self {
        self.participants.push(json!({ "name": name, "kind": kind }));
        self
    }

    /// Mark as a reference to an earlier event described by `recalls`.
    pub fn recalls(mut self, recalls: impl Into<String>) -> Self {
        self.flashback = true;
        self.recalls = Some(recalls.into());
        self
    }

    pub fn build(self) -> Value {
        json!({
            "title": self.title,
            "description": self.description,
            "quote": self.quote,
            "archetype": self.archetype,
            "participants": self.participants,
            "flashback": self.flashback,
            "recalls": self.recalls,
        })
    }
}

pub fn beats(beats: Vec<BeatBuilder>) -> Value {
    json!({ "beats": beats.into_iter().map(BeatBuilder::build).collect::<Vec<_>>() })
}

/// `cast` answer: `(name, kind)` pairs.
pub fn cast(entities: &[(&str, &str)]) -> Value {
    json!({
        "entities": entities
            .iter()
            .map(|(name, kind)| json!({ "name": name, "kind": kind }))
            .collect::<Vec<_>>()
    })
}

/// One action of an `actions` answer.
pub struct ActionBuilder {
    phrase: String,
    actor: String,
    target: Option<(String, String)>,
    quote: Option<String>,
}

impl ActionBuilder {
    pub fn new(actor: impl Into<String>, phrase: impl Into<String>) -> Self {
        Self {
            phrase: phrase.into(),
            actor: actor.into(),
            target: None,
            quote: None,
        }
    }

    pub fn target(mut self, name: &str, kind: &str) -> Self {
        self.target = Some((name.to_string(), kind.to_string()));
        self
    }

    pub fn quote(mut self, quote: impl Into<String>) -> Self {
        self.quote = Some(quote.into());
        self
    }

    pub fn build(self) -> Value {
        let (target, target_kind) = match self.target {
            Some((name, kind)) => (Some(name), Some(kind)),
            None => (None, None),
        };
        json!({
            "phrase": self.phrase,
            "actor": self.actor,
            "target": target,
            "target_kind": target_kind,
            "quote": self.quote,
        })
    }
}

pub fn actions(actions: Vec<ActionBuilder>) -> Value {
    json!({ "actions": actions.into_iter().map(ActionBuilder::build).collect::<Vec<_>>() })
}

/// `vibes` answer: `(quote, mood)` pairs.
pub fn vibes(snippets: &[(&str, &str)]) -> Value {
    json!({
        "snippets": snippets
            .iter()
            .map(|(text, mood)| json!({ "text": text, "mood": mood }))
            .collect::<Vec<_>>()
    })
}

/// An answer whose only list field is empty.
pub fn empty(field: &str) -> Value {
    let mut map = serde_json::Map::new();
    map.insert(field.to_string(), json!([]));
    Value::Object(map)
}

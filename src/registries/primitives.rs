//! Closed Game Primitive registry.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Action system a primitive belongs to; selects the action stat bias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActionSystem {
    Combat,
    Magic,
    Social,
    Explore,
    Stealth,
    Flavor,
}

impl ActionSystem {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionSystem::Combat => "combat",
            ActionSystem::Magic => "magic",
            ActionSystem::Social => "social",
            ActionSystem::Explore => "explore",
            ActionSystem::Stealth => "stealth",
            ActionSystem::Flavor => "flavor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GamePrimitive {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub system: ActionSystem,
    /// Material, Vitality, Social, Cognitive.
    pub profile: [f32; 4],
}

impl GamePrimitive {
    pub fn semantic_text(&self) -> String {
        format!("{}: {}", self.name, self.description)
    }
}

const fn primitive(
    id: &'static str,
    name: &'static str,
    description: &'static str,
    system: ActionSystem,
    profile: [f32; 4],
) -> GamePrimitive {
    GamePrimitive {
        id,
        name,
        description,
        system,
        profile,
    }
}

use ActionSystem::*;

pub const PRIMITIVES: &[GamePrimitive] = &[
    primitive("melee_attack", "Melee Attack", "A direct attempt to harm the target with a weapon or the body at close range: slash, stab, strike, punch.", Combat, [0.9, 0.9, 0.1, 0.1]),
    primitive("ranged_attack", "Ranged Attack", "Harming a target from a distance with a bow, gun, sling or thrown object.", Combat, [0.8, 0.8, 0.1, 0.3]),
    primitive("grapple", "Grapple", "Seizing, pinning or restraining someone with physical force.", Combat, [0.7, 0.9, 0.2, 0.1]),
    primitive("defend", "Defend", "Blocking, parrying or shielding against an attack.", Combat, [0.8, 0.7, 0.2, 0.3]),
    primitive("traverse", "Traverse", "Moving through difficult terrain: running, swimming, crossing, fleeing.", Explore, [0.6, 0.7, 0.0, 0.2]),
    primitive("climb", "Climb", "Scaling a wall, cliff, tree or tower.", Explore, [0.8, 0.8, 0.0, 0.2]),
    primitive("open", "Open", "Forcing or unlocking a door, lock, chest or seal.", Explore, [0.8, 0.2, 0.0, 0.5]),
    primitive("break_object", "Break Object", "Smashing, shattering or destroying an object or barrier.", Combat, [1.0, 0.4, 0.0, 0.0]),
    primitive("inspect", "Inspect", "Searching, examining, deciphering or investigating something closely.", Explore, [0.3, 0.1, 0.1, 0.9]),
    primitive("take", "Take", "Picking up, grabbing or acquiring an item openly.", Explore, [0.8, 0.1, 0.2, 0.1]),
    primitive("steal", "Steal", "Taking something covertly: pickpocketing, theft, sleight of hand.", Stealth, [0.7, 0.2, 0.4, 0.6]),
    primitive("hide", "Hide", "Concealing oneself or an object; sneaking unseen.", Stealth, [0.4, 0.3, 0.2, 0.7]),
    primitive("persuade", "Persuade", "Convincing someone through argument, charm or negotiation.", Social, [0.0, 0.1, 0.9, 0.7]),
    primitive("intimidate", "Intimidate", "Coercing someone through threats or a show of force.", Social, [0.3, 0.5, 0.9, 0.3]),
    primitive("command", "Command", "Giving orders backed by authority or rank.", Social, [0.1, 0.2, 1.0, 0.5]),
    primitive("bribe", "Bribe", "Offering money or goods to sway someone.", Social, [0.7, 0.0, 0.8, 0.4]),
    primitive("deceive", "Deceive", "Lying, bluffing, disguising intent or forging.", Social, [0.0, 0.1, 0.8, 0.9]),
    primitive("heal", "Heal", "Tending wounds, curing illness or restoring vitality.", Magic, [0.3, 1.0, 0.3, 0.5]),
    primitive("consume", "Consume", "Eating, drinking or using up a potion or substance.", Flavor, [0.6, 0.8, 0.1, 0.1]),
    primitive("channel", "Channel", "Casting a spell, invoking a ritual or drawing on arcane power.", Magic, [0.2, 0.5, 0.3, 1.0]),
    primitive("repair", "Repair", "Mending a broken object, mechanism or structure.", Explore, [0.9, 0.1, 0.1, 0.6]),
    primitive("craft", "Craft", "Making a new item from materials: forging, brewing, building.", Explore, [0.9, 0.2, 0.2, 0.7]),
];

pub fn find_primitive(id: &str) -> Option<&'static GamePrimitive> {
    PRIMITIVES.iter().find(|p| p.id == id)
}

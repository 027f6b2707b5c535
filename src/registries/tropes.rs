//! Trope / arc registry matched against sliding windows of the chronicle.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TropeTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

impl TropeTemplate {
    pub fn semantic_text(&self) -> String {
        format!("{}: {}", self.name, self.description)
    }
}

pub const TROPES: &[TropeTemplate] = &[
    TropeTemplate {
        id: "arc_classic_revenge",
        name: "Cycle of Retribution",
        description: "A protagonist suffers a loss caused by an antagonist, flees or falls low, gains power, and returns to destroy them in a final confrontation.",
    },
    TropeTemplate {
        id: "arc_grand_heist",
        name: "Grand Heist",
        description: "A crew is assembled, a guarded prize is studied, a plan is executed through infiltration and deception, and the crew escapes with the loot or is betrayed.",
    },
    TropeTemplate {
        id: "arc_call_to_adventure",
        name: "Call to Adventure",
        description: "An ordinary person receives a summons, refuses or hesitates, meets a mentor, and crosses the threshold into an unknown world.",
    },
    TropeTemplate {
        id: "arc_descent_into_madness",
        name: "Descent into Madness",
        description: "A character's grip on reality loosens through obsession, visions and paranoia until they act against their former self.",
    },
    TropeTemplate {
        id: "arc_fall_from_grace",
        name: "Fall from Grace",
        description: "A respected figure is disgraced by a secret, a betrayal or their own pride and loses rank, allies and home.",
    },
    TropeTemplate {
        id: "arc_rise_to_power",
        name: "Rise to Power",
        description: "An outsider climbs a hierarchy through alliances, schemes and victories until they hold command.",
    },
    TropeTemplate {
        id: "arc_forbidden_love",
        name: "Forbidden Love",
        description: "Two people from opposed sides fall in love, meet in secret, are discovered, and must choose between love and loyalty.",
    },
    TropeTemplate {
        id: "arc_escape_and_pursuit",
        name: "Escape and Pursuit",
        description: "Captives break free, flee through hostile terrain while hunted, and reach refuge or are recaptured.",
    },
    TropeTemplate {
        id: "arc_sacrifice",
        name: "Noble Sacrifice",
        description: "Facing a threat to others, a character gives up their life, freedom or dearest possession to save them.",
    },
    TropeTemplate {
        id: "arc_mystery_unveiled",
        name: "Mystery Unveiled",
        description: "A strange event prompts an investigation; clues are gathered, suspects questioned, and a hidden truth revealed.",
    },
];

pub fn find_trope(id: &str) -> Option<&'static TropeTemplate> {
    TROPES.iter().find(|t| t.id == id)
}

//! Topology Template registry: reusable static property sets for Locations.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TopologyTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub layout: &'static str,
    pub description: &'static str,
    /// Static properties inherited by promoted Locations.
    pub properties: &'static [&'static str],
    /// Material, Vitality, Social, Cognitive.
    pub profile: [f32; 4],
    /// Extra names that promote by exact/fuzzy match.
    pub synonyms: &'static [&'static str],
}

impl TopologyTemplate {
    pub fn semantic_text(&self) -> String {
        format!("{} ({} layout): {}", self.name, self.layout, self.description)
    }
}

pub const TOPOLOGY_TEMPLATES: &[TopologyTemplate] = &[
    TopologyTemplate {
        id: "topo_linear_gauntlet",
        name: "Linear Gauntlet",
        layout: "chain",
        description: "A strictly sequential layout: corridor, tunnel, bridge or mine shaft where progress means moving from one node to the next.",
        properties: &["sequential", "chokepoints", "no_backtracking"],
        profile: [0.9, 0.8, 0.1, 0.2],
        synonyms: &["corridor", "tunnel", "passage", "bridge", "mine"],
    },
    TopologyTemplate {
        id: "topo_hub_spoke",
        name: "Hub and Spoke",
        layout: "star",
        description: "A central common area connected to peripheral dead-end rooms: tavern, market square, court, town.",
        properties: &["central_hub", "social_space", "safe_zone"],
        profile: [0.5, 0.1, 0.9, 0.4],
        synonyms: &["tavern", "inn", "market", "square", "court", "town", "village"],
    },
    TopologyTemplate {
        id: "topo_vertical_stack",
        name: "Vertical Stack",
        layout: "tree_vertical",
        description: "A vertically stacked hierarchy of floors where going up costs effort: tower, spire, keep.",
        properties: &["vertical", "hierarchy", "climb_required"],
        profile: [0.8, 0.5, 0.5, 0.6],
        synonyms: &["tower", "spire", "keep", "lighthouse"],
    },
    TopologyTemplate {
        id: "topo_organic_labyrinth",
        name: "Organic Labyrinth",
        layout: "mesh",
        description: "A tangled, looping network with no clear path: forest, cave system, maze, sewers.",
        properties: &["looping", "disorienting", "ambush_prone"],
        profile: [0.6, 0.9, 0.1, 0.7],
        synonyms: &["forest", "woods", "cave", "caves", "maze", "labyrinth", "sewers", "garden"],
    },
    TopologyTemplate {
        id: "topo_open_expanse",
        name: "Open Expanse",
        layout: "field",
        description: "A wide open area with long sight lines and little cover: plain, desert, sea, battlefield.",
        properties: &["open", "exposed", "long_range"],
        profile: [0.5, 0.7, 0.2, 0.3],
        synonyms: &["plain", "plains", "desert", "field", "sea", "ocean", "battlefield"],
    },
    TopologyTemplate {
        id: "topo_sanctum",
        name: "Sanctum",
        layout: "nested",
        description: "An enclosed inner chamber guarded by layers: temple, vault, library, throne room.",
        properties: &["enclosed", "guarded", "knowledge_store"],
        profile: [0.6, 0.3, 0.6, 0.9],
        synonyms: &["temple", "vault", "library", "throne room", "shrine", "chapel"],
    },
];

pub fn find_template(id: &str) -> Option<&'static TopologyTemplate> {
    TOPOLOGY_TEMPLATES.iter().find(|t| t.id == id)
}

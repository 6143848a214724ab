use std::collections::HashMap;
use std::fmt;

/// Logical models stored by the engine. Physical table names follow
/// `{Model}-{apiId}-{env}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Model {
    Game,
    SocialPost,
    SocialAccount,
    SocialPostGameData,
    SocialPostGameLink,
    RecurringGame,
    ActiveGame,
    UpcomingGame,
    RecentlyFinishedGame,
    Venue,
    Entity,
    GameFinancialSnapshot,
}

impl Model {
    pub const ALL: [Model; 12] = [
        Model::Game,
        Model::SocialPost,
        Model::SocialAccount,
        Model::SocialPostGameData,
        Model::SocialPostGameLink,
        Model::RecurringGame,
        Model::ActiveGame,
        Model::UpcomingGame,
        Model::RecentlyFinishedGame,
        Model::Venue,
        Model::Entity,
        Model::GameFinancialSnapshot,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Model::Game => "Game",
            Model::SocialPost => "SocialPost",
            Model::SocialAccount => "SocialAccount",
            Model::SocialPostGameData => "SocialPostGameData",
            Model::SocialPostGameLink => "SocialPostGameLink",
            Model::RecurringGame => "RecurringGame",
            Model::ActiveGame => "ActiveGame",
            Model::UpcomingGame => "UpcomingGame",
            Model::RecentlyFinishedGame => "RecentlyFinishedGame",
            Model::Venue => "Venue",
            Model::Entity => "Entity",
            Model::GameFinancialSnapshot => "GameFinancialSnapshot",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }

    /// Environment variable that pins this model's table name.
    pub fn override_var(self) -> String {
        format!("API_KINGSROOM_{}TABLE_NAME", self.as_str().to_ascii_uppercase())
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub api_id: String,
    pub env: String,
    overrides: HashMap<Model, String>,
}

impl Default for TableNames {
    fn default() -> Self {
        Self::new("local", "dev")
    }
}

impl TableNames {
    pub const API_ID_VAR: &'static str = "API_KINGSROOM_GRAPHQLAPIIDOUTPUT";
    pub const ENV_VAR: &'static str = "ENV";

    pub fn new(api_id: impl Into<String>, env: impl Into<String>) -> Self {
        Self {
            api_id: api_id.into(),
            env: env.into(),
            overrides: HashMap::new(),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut names = Self::new(
            non_empty(Self::API_ID_VAR).unwrap_or(defaults.api_id),
            non_empty(Self::ENV_VAR).unwrap_or(defaults.env),
        );
        for model in Model::ALL {
            if let Some(name) = non_empty(&model.override_var()) {
                names.overrides.insert(model, name);
            }
        }
        names
    }

    pub fn with_override(mut self, model: Model, table: impl Into<String>) -> Self {
        self.overrides.insert(model, table.into());
        self
    }

    pub fn table(&self, model: Model) -> String {
        self.overrides
            .get(&model)
            .cloned()
            .unwrap_or_else(|| format!("{}-{}-{}", model.as_str(), self.api_id, self.env))
    }

    /// Reverse lookup from a physical table name.
    pub fn model_of(&self, table: &str) -> Option<Model> {
        Model::ALL.into_iter().find(|m| self.table(*m) == table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_convention_and_overrides() {
        let names = TableNames::from_lookup(|key| match key {
            "API_KINGSROOM_GRAPHQLAPIIDOUTPUT" => Some("abc123".into()),
            "ENV" => Some("prod".into()),
            "API_KINGSROOM_SOCIALPOSTGAMELINKTABLE_NAME" => Some("links-custom".into()),
            _ => None,
        });
        assert_eq!(names.table(Model::Game), "Game-abc123-prod");
        assert_eq!(names.table(Model::SocialPostGameLink), "links-custom");
        assert_eq!(names.model_of("Game-abc123-prod"), Some(Model::Game));
    }

    #[test]
    fn missing_env_uses_local_defaults() {
        let names = TableNames::from_lookup(|_| None);
        assert_eq!(names.table(Model::ActiveGame), "ActiveGame-local-dev");
        assert_eq!(Model::from_name("Venue"), Some(Model::Venue));
    }
}

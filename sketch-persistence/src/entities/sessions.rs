use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub host_id: Uuid,
    /// `PhaseKind` as its snake_case name.
    pub phase: String,
    pub drawer_id: Option<Uuid>,
    pub word: Option<String>,
    /// JSON array of offered words while choosing.
    #[sea_orm(column_type = "Text")]
    pub choices: String,
    pub turn_index: i32,
    pub turns_per_cycle: i32,
    pub cycles_total: i32,
    pub round_duration_seconds: i32,
    pub phase_started_at: DateTimeUtc,
    /// JSON array of lowercased words already drawn.
    #[sea_orm(column_type = "Text")]
    pub used_words: String,
    pub version: i64,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::participants::Entity")]
    Participants,
    #[sea_orm(has_many = "super::chat_entries::Entity")]
    ChatEntries,
    #[sea_orm(has_many = "super::strokes::Entity")]
    Strokes,
}

impl Related<super::participants::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Participants.def()
    }
}

impl Related<super::chat_entries::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ChatEntries.def()
    }
}

impl Related<super::strokes::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Strokes.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

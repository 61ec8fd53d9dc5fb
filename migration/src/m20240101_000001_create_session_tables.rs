use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Sessions::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Sessions::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Sessions::HostId).uuid().not_null())
                    .col(
                        ColumnDef::new(Sessions::Phase)
                            .string()
                            .not_null()
                            .default("waiting"),
                    )
                    .col(ColumnDef::new(Sessions::DrawerId).uuid().null())
                    .col(ColumnDef::new(Sessions::Word).string().null())
                    .col(
                        ColumnDef::new(Sessions::Choices)
                            .text()
                            .not_null()
                            .default("[]"),
                    )
                    .col(
                        ColumnDef::new(Sessions::TurnIndex)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Sessions::TurnsPerCycle)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Sessions::CyclesTotal).integer().not_null())
                    .col(
                        ColumnDef::new(Sessions::RoundDurationSeconds)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Sessions::PhaseStartedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Sessions::UsedWords)
                            .text()
                            .not_null()
                            .default("[]"),
                    )
                    .col(
                        ColumnDef::new(Sessions::Version)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Sessions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Participants::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Participants::SessionId).uuid().not_null())
                    .col(ColumnDef::new(Participants::UserId).uuid().not_null())
                    .col(ColumnDef::new(Participants::DisplayName).string().not_null())
                    .col(
                        ColumnDef::new(Participants::Score)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Participants::JoinedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Participants::IsConnected)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .primary_key(
                        Index::create()
                            .col(Participants::SessionId)
                            .col(Participants::UserId),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ChatEntries::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(ChatEntries::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(ChatEntries::SessionId).uuid().not_null())
                    .col(ColumnDef::new(ChatEntries::AuthorId).uuid().not_null())
                    .col(ColumnDef::new(ChatEntries::AuthorName).string().not_null())
                    .col(ColumnDef::new(ChatEntries::Text).text().not_null())
                    .col(ColumnDef::new(ChatEntries::IsGuess).boolean().not_null())
                    .col(ColumnDef::new(ChatEntries::IsCorrect).boolean().not_null())
                    .col(ColumnDef::new(ChatEntries::SolvedTurn).integer().null())
                    .col(
                        ColumnDef::new(ChatEntries::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Chat is always read per session
        manager
            .create_index(
                Index::create()
                    .name("idx_chat_entries_session_id")
                    .table(ChatEntries::Table)
                    .col(ChatEntries::SessionId)
                    .to_owned(),
            )
            .await?;

        // One correct guess per author per turn; NULLs never collide
        manager
            .create_index(
                Index::create()
                    .name("idx_chat_entries_one_solve_per_turn")
                    .table(ChatEntries::Table)
                    .col(ChatEntries::SessionId)
                    .col(ChatEntries::AuthorId)
                    .col(ChatEntries::SolvedTurn)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Strokes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Strokes::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Strokes::SessionId).uuid().not_null())
                    .col(ColumnDef::new(Strokes::AuthorId).uuid().not_null())
                    .col(ColumnDef::new(Strokes::PathId).uuid().null())
                    .col(ColumnDef::new(Strokes::Tool).string().not_null())
                    .col(ColumnDef::new(Strokes::Payload).text().not_null())
                    .col(
                        ColumnDef::new(Strokes::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Replay order is (session_id, id)
        manager
            .create_index(
                Index::create()
                    .name("idx_strokes_session_id")
                    .table(Strokes::Table)
                    .col(Strokes::SessionId)
                    .col(Strokes::Id)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Strokes::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ChatEntries::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Participants::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Sessions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Sessions {
    Table,
    Id,
    HostId,
    Phase,
    DrawerId,
    Word,
    Choices,
    TurnIndex,
    TurnsPerCycle,
    CyclesTotal,
    RoundDurationSeconds,
    PhaseStartedAt,
    UsedWords,
    Version,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Participants {
    Table,
    SessionId,
    UserId,
    DisplayName,
    Score,
    JoinedAt,
    IsConnected,
}

#[derive(DeriveIden)]
enum ChatEntries {
    Table,
    Id,
    SessionId,
    AuthorId,
    AuthorName,
    Text,
    IsGuess,
    IsCorrect,
    SolvedTurn,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Strokes {
    Table,
    Id,
    SessionId,
    AuthorId,
    PathId,
    Tool,
    Payload,
    CreatedAt,
}

//! Migration to create the tenants table.
//!
//! Generated database and role names carry unique indexes; they are the
//! authoritative guard against identifier collisions between concurrent
//! provisioning requests.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Tenants::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Tenants::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Tenants::DatabaseName).text().not_null())
                    .col(ColumnDef::new(Tenants::RoleName).text().not_null())
                    .col(ColumnDef::new(Tenants::PasswordHash).text().not_null())
                    .col(ColumnDef::new(Tenants::OwnerEmail).text().not_null())
                    .col(ColumnDef::new(Tenants::FriendlyName).text().not_null())
                    .col(
                        ColumnDef::new(Tenants::MaxConnections)
                            .integer()
                            .not_null()
                            .default(20),
                    )
                    .col(
                        ColumnDef::new(Tenants::Status)
                            .text()
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(Tenants::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Tenants::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_tenants_database_name")
                    .table(Tenants::Table)
                    .col(Tenants::DatabaseName)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_tenants_role_name")
                    .table(Tenants::Table)
                    .col(Tenants::RoleName)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_tenants_role_name").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_tenants_database_name").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Tenants::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
    DatabaseName,
    RoleName,
    PasswordHash,
    OwnerEmail,
    FriendlyName,
    MaxConnections,
    Status,
    CreatedAt,
    UpdatedAt,
}

//! Migration to create the whitelist_entries table.
//!
//! Entries belong to exactly one tenant and disappear with it. The
//! `(tenant_id, address)` pair is unique so the same CIDR cannot be granted
//! twice to one tenant.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WhitelistEntries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WhitelistEntries::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(WhitelistEntries::TenantId).uuid().not_null())
                    .col(ColumnDef::new(WhitelistEntries::Address).text().not_null())
                    .col(ColumnDef::new(WhitelistEntries::Description).text().null())
                    .col(
                        ColumnDef::new(WhitelistEntries::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_whitelist_entries_tenant_id")
                            .from(WhitelistEntries::Table, WhitelistEntries::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_whitelist_entries_tenant_address")
                    .table(WhitelistEntries::Table)
                    .col(WhitelistEntries::TenantId)
                    .col(WhitelistEntries::Address)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_whitelist_entries_tenant_address")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(WhitelistEntries::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum WhitelistEntries {
    Table,
    Id,
    TenantId,
    Address,
    Description,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
}

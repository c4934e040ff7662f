use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_providers_table::Migration),
            Box::new(m20240301_000002_create_medicines_table::Migration),
            Box::new(m20240301_000003_create_locations_table::Migration),
            Box::new(m20240301_000004_create_batches_table::Migration),
        ]
    }
}

#[derive(DeriveIden)]
enum Providers {
    Table,
    Id,
    Name,
    Email,
    Phone,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Medicines {
    Table,
    Id,
    Name,
    Barcode,
    Dosage,
    Formulation,
    UnitPrice,
    AlertThreshold,
    AutomaticReorder,
    ReorderQuantity,
    ProviderId,
    ImagePath,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Locations {
    Table,
    Id,
    Name,
    Description,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Batches {
    Table,
    Id,
    MedicineId,
    LocationId,
    Quantity,
    ExpirationDate,
    CreatedAt,
    UpdatedAt,
}

mod m20240301_000001_create_providers_table {
    use super::Providers;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_providers_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Providers::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Providers::Id)
                                .big_integer()
                                .primary_key()
                                .auto_increment()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Providers::Name)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Providers::Email).string().null())
                        .col(ColumnDef::new(Providers::Phone).string().null())
                        .col(
                            ColumnDef::new(Providers::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Providers::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Providers::Table).to_owned())
                .await
        }
    }
}

mod m20240301_000002_create_medicines_table {
    use super::{Medicines, Providers};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_medicines_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Medicines::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Medicines::Id)
                                .big_integer()
                                .primary_key()
                                .auto_increment()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Medicines::Name).string().not_null())
                        .col(
                            ColumnDef::new(Medicines::Barcode)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Medicines::Dosage).string().not_null())
                        .col(
                            ColumnDef::new(Medicines::Formulation)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Medicines::UnitPrice)
                                .decimal_len(10, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Medicines::AlertThreshold)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Medicines::AutomaticReorder)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Medicines::ReorderQuantity).integer().null())
                        .col(ColumnDef::new(Medicines::ProviderId).big_integer().null())
                        .col(ColumnDef::new(Medicines::ImagePath).string().null())
                        .col(
                            ColumnDef::new(Medicines::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Medicines::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_medicines_provider")
                                .from(Medicines::Table, Medicines::ProviderId)
                                .to(Providers::Table, Providers::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Medicines::Table).to_owned())
                .await
        }
    }
}

mod m20240301_000003_create_locations_table {
    use super::Locations;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_locations_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Locations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Locations::Id)
                                .big_integer()
                                .primary_key()
                                .auto_increment()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Locations::Name)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Locations::Description).text().null())
                        .col(
                            ColumnDef::new(Locations::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Locations::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Locations::Table).to_owned())
                .await
        }
    }
}

mod m20240301_000004_create_batches_table {
    use super::{Batches, Locations, Medicines};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_batches_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Batches::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Batches::Id)
                                .big_integer()
                                .primary_key()
                                .auto_increment()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Batches::MedicineId).big_integer().not_null())
                        .col(ColumnDef::new(Batches::LocationId).big_integer().not_null())
                        .col(
                            ColumnDef::new(Batches::Quantity)
                                .big_integer()
                                .not_null()
                                .default(0)
                                .check(Expr::col(Batches::Quantity).gte(0)),
                        )
                        .col(ColumnDef::new(Batches::ExpirationDate).date().not_null())
                        .col(
                            ColumnDef::new(Batches::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Batches::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_batches_medicine")
                                .from(Batches::Table, Batches::MedicineId)
                                .to(Medicines::Table, Medicines::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_batches_location")
                                .from(Batches::Table, Batches::LocationId)
                                .to(Locations::Table, Locations::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            // Backstop for the find-or-merge in receive_batch
            manager
                .create_index(
                    Index::create()
                        .name("idx_batches_medicine_location_expiration")
                        .table(Batches::Table)
                        .col(Batches::MedicineId)
                        .col(Batches::LocationId)
                        .col(Batches::ExpirationDate)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_batches_location")
                        .table(Batches::Table)
                        .col(Batches::LocationId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Batches::Table).to_owned())
                .await
        }
    }
}

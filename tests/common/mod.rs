//! Shared test fixtures.
//!
//! Builds an in-memory loyalty core with a seeded account directory and
//! one business/program pair.

use std::sync::Arc;

use punchcard::accounts::{AccountProfile, StaticDirectory};
use punchcard::config::Config;
use punchcard::facade::Loyalty;
use punchcard::model::{Business, Card, Decision, Program};

/// Account id registered in the test directory.
pub const ACCOUNT: &str = "acct-1";

pub struct TestWorld {
    pub loyalty: Loyalty,
    pub directory: Arc<StaticDirectory>,
    pub business: Business,
    pub program: Program,
}

/// Build a world with the default test config.
pub async fn setup() -> TestWorld {
    setup_with(Config::for_test()).await
}

/// Build a world with a customized config.
pub async fn setup_with(config: Config) -> TestWorld {
    let directory = Arc::new(StaticDirectory::new());
    directory.insert(AccountProfile {
        account_id: ACCOUNT.to_string(),
        name: "Ada Lovelace".to_string(),
        email: "ada@example.com".to_string(),
    });

    let loyalty = Loyalty::builder(config)
        .with_accounts(directory.clone())
        .build()
        .await
        .expect("build loyalty core");

    let business = loyalty
        .ledger()
        .create_business("Beanhouse")
        .await
        .expect("create business");
    let program = loyalty
        .ledger()
        .create_program(business.id, "Coffee Club")
        .await
        .expect("create program");

    TestWorld {
        loyalty,
        directory,
        business,
        program,
    }
}

/// Run the full request/approve flow and return the provisioned card.
pub async fn approved_card(world: &TestWorld) -> Card {
    let request = world
        .loyalty
        .request_enrollment(world.business.id, world.program.id, ACCOUNT)
        .await
        .expect("request enrollment");
    let outcome = world
        .loyalty
        .resolve_approval(request.id, Decision::Approve)
        .await
        .expect("approve enrollment");
    let card_id = outcome.card_id.expect("approval should provision a card");
    world
        .loyalty
        .ledger()
        .card(card_id)
        .await
        .expect("card lookup")
        .expect("card should exist")
}

/// Count rows returned by a `SELECT COUNT(*)` query.
pub async fn count_rows(world: &TestWorld, sql: &str) -> i64 {
    let row: (i64,) = sqlx::query_as(sql)
        .fetch_one(world.loyalty.pool())
        .await
        .expect("count query");
    row.0
}

//! Test utilities for database operations.
//!
//! Tests run against a private in-memory SQLite database with all migrations
//! applied. The pool holds a single connection so every query sees the same
//! database.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr, Set};
use sea_orm_migration::MigratorTrait;

use crate::entities::{actor, actor_keypair, blocking, group_member, subscription};
use crate::migrations::Migrator;
use crate::repositories::{
    ActorKeypairRepository, ActorRepository, BlockingRepository, GroupMemberRepository,
    SubscriptionRepository,
};

/// A migrated in-memory database.
pub struct TestDatabase {
    /// Database connection.
    pub conn: Arc<DatabaseConnection>,
}

impl TestDatabase {
    /// Open a fresh in-memory SQLite database and run migrations.
    pub async fn new() -> Result<Self, DbErr> {
        let mut opt = ConnectOptions::new("sqlite::memory:");
        opt.max_connections(1).min_connections(1).sqlx_logging(false);

        let conn = Database::connect(opt).await?;
        Migrator::up(&conn, None).await?;

        Ok(Self {
            conn: Arc::new(conn),
        })
    }

    /// Get the shared database connection.
    #[must_use]
    pub fn connection(&self) -> Arc<DatabaseConnection> {
        Arc::clone(&self.conn)
    }

    /// Insert a local person.
    pub async fn local_actor(&self, id: &str) -> actor::Model {
        self.actor(id, actor::ActorKind::Person, true, None, None)
            .await
    }

    /// Insert a remote person with a personal and an optional shared inbox.
    pub async fn remote_actor(&self, id: &str, host: &str, shared: bool) -> actor::Model {
        let inbox = format!("https://{host}/users/{id}/inbox");
        let shared_inbox = shared.then(|| format!("https://{host}/inbox"));
        self.actor(
            id,
            actor::ActorKind::Person,
            false,
            Some(inbox),
            shared_inbox,
        )
        .await
    }

    /// Insert an actor row.
    ///
    /// # Panics
    ///
    /// Panics if the insert fails.
    #[allow(clippy::expect_used)]
    pub async fn actor(
        &self,
        id: &str,
        kind: actor::ActorKind,
        is_local: bool,
        inbox: Option<String>,
        shared_inbox: Option<String>,
    ) -> actor::Model {
        let uri = match &inbox {
            Some(inbox) => inbox.trim_end_matches("/inbox").to_string(),
            None => format!("https://local.example/users/{id}"),
        };
        ActorRepository::new(self.connection())
            .create(actor::ActiveModel {
                id: Set(id.to_string()),
                uri: Set(uri),
                kind: Set(kind),
                is_local: Set(is_local),
                inbox: Set(inbox),
                shared_inbox: Set(shared_inbox),
                created_at: Set(Utc::now().into()),
            })
            .await
            .expect("insert actor")
    }

    /// Make `subscriber` follow `subscribed`.
    ///
    /// # Panics
    ///
    /// Panics if the insert fails.
    #[allow(clippy::expect_used)]
    pub async fn subscribe(&self, subscriber: &str, subscribed: &str) {
        SubscriptionRepository::new(self.connection())
            .create(subscription::ActiveModel {
                id: Set(format!("sub-{subscriber}-{subscribed}")),
                subscriber_id: Set(subscriber.to_string()),
                subscribed_id: Set(subscribed.to_string()),
                created_at: Set(Utc::now().into()),
            })
            .await
            .expect("insert subscription");
    }

    /// Make `blocker` block `blockee`.
    ///
    /// # Panics
    ///
    /// Panics if the insert fails.
    #[allow(clippy::expect_used)]
    pub async fn block(&self, blocker: &str, blockee: &str) {
        BlockingRepository::new(self.connection())
            .create(blocking::ActiveModel {
                id: Set(format!("block-{blocker}-{blockee}")),
                blocker_id: Set(blocker.to_string()),
                blockee_id: Set(blockee.to_string()),
                created_at: Set(Utc::now().into()),
            })
            .await
            .expect("insert blocking");
    }

    /// Add `member` to `group`.
    ///
    /// # Panics
    ///
    /// Panics if the insert fails.
    #[allow(clippy::expect_used)]
    pub async fn join_group(&self, group: &str, member: &str) {
        GroupMemberRepository::new(self.connection())
            .create(group_member::ActiveModel {
                id: Set(format!("member-{group}-{member}")),
                group_id: Set(group.to_string()),
                member_id: Set(member.to_string()),
                created_at: Set(Utc::now().into()),
            })
            .await
            .expect("insert group member");
    }

    /// Store a signing keypair for an actor.
    ///
    /// # Panics
    ///
    /// Panics if the insert fails.
    #[allow(clippy::expect_used)]
    pub async fn keypair(&self, actor_id: &str, public_key: &str, private_key: &str) {
        ActorKeypairRepository::new(self.connection())
            .create(actor_keypair::ActiveModel {
                actor_id: Set(actor_id.to_string()),
                key_id: Set(format!("https://local.example/users/{actor_id}#main-key")),
                public_key: Set(public_key.to_string()),
                private_key: Set(private_key.to_string()),
                created_at: Set(Utc::now().into()),
            })
            .await
            .expect("insert keypair");
    }
}

//! Duochat demo binary.
//!
//! Plays a scripted conversation between two users on an in-memory store
//! and logs what each side observes. Useful for eyeballing the sync rules
//! and for trying the retry path under injected store failures.
//!
//! # Usage
//!
//! ```bash
//! # Default script
//! duochat --alice alice --bob bob
//!
//! # Fail 20% of store operations, verbose logs
//! duochat --chaos-rate 0.2 --log-level debug
//! ```

use clap::Parser;
use duochat_core::{
    ChaoticStore, ChatClient, ChatConfig, ChatError, Environment, MemoryStore, RetryPolicy,
    StaticIdentity, Store, SystemEnv, UserId, UserProfile,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Duochat scripted session
#[derive(Parser, Debug)]
#[command(name = "duochat")]
#[command(about = "Run a scripted two-user chat session on an in-memory store")]
#[command(version)]
struct Args {
    /// First user's id
    #[arg(long, default_value = "alice")]
    alice: String,

    /// Second user's id
    #[arg(long, default_value = "bob")]
    bob: String,

    /// Messages the first user sends while the second is away
    #[arg(short, long, default_value = "3")]
    messages: usize,

    /// Longest roster preview, in characters
    #[arg(long, default_value = "60")]
    preview_chars: usize,

    /// Fraction of store operations to fail (0.0 to 1.0)
    #[arg(long)]
    chaos_rate: Option<f64>,

    /// Seed for failure injection
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Attempts per idempotent store operation
    #[arg(long, default_value = "4")]
    max_attempts: u32,

    /// Print the final store contents
    #[arg(long)]
    dump: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

type Client<S> = ChatClient<S, SystemEnv, StaticIdentity>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let alice = UserId::new(args.alice.as_str())?;
    let bob = UserId::new(args.bob.as_str())?;
    let config = ChatConfig {
        preview_max_chars: args.preview_chars,
        retry: RetryPolicy { max_attempts: args.max_attempts.max(1), ..RetryPolicy::default() },
    };

    let env = SystemEnv::new();
    let root = MemoryStore::new(env.clone());
    let alice_connection = root.connect()?;
    let bob_connection = root.connect()?;

    tracing::info!(%alice, %bob, messages = args.messages, "Duochat session starting");

    match args.chaos_rate {
        Some(rate) => {
            if !(0.0..=1.0).contains(&rate) {
                return Err(format!("--chaos-rate must be within 0.0..=1.0, got {rate}").into());
            }
            tracing::warn!(rate, seed = args.seed, "Injecting store failures");
            let chaotic = |connection: &MemoryStore<SystemEnv>, salt: u64| {
                ChaoticStore::with_seed(connection.clone(), rate, args.seed ^ salt)
            };
            let session = Session {
                alice: client(chaotic(&alice_connection, 1), &env, &alice, &config),
                bob: client(chaotic(&bob_connection, 2), &env, &bob, &config),
                alice_connection,
                env: env.clone(),
                messages: args.messages,
            };
            session.run().await?;
        },
        None => {
            let session = Session {
                alice: client(alice_connection.clone(), &env, &alice, &config),
                bob: client(bob_connection, &env, &bob, &config),
                alice_connection,
                env: env.clone(),
                messages: args.messages,
            };
            session.run().await?;
        },
    }

    if args.dump {
        tracing::info!(store = %serde_json::to_string_pretty(&root.dump()?)?, "Final store");
    }

    tracing::info!("Duochat session finished");
    Ok(())
}

fn client<S: Store>(store: S, env: &SystemEnv, user: &UserId, config: &ChatConfig) -> Client<S> {
    ChatClient::new(store, env.clone(), StaticIdentity::signed_in(user.clone()), config)
}

/// Scripted exchange between two clients.
struct Session<S: Store> {
    alice: Client<S>,
    bob: Client<S>,
    /// Underlying connection of the first user, dropped near the end.
    alice_connection: MemoryStore<SystemEnv>,
    env: SystemEnv,
    messages: usize,
}

impl<S: Store> Session<S> {
    async fn run(&self) -> Result<(), ChatError> {
        let alice = self.alice.viewer()?;
        let bob = self.bob.viewer()?;

        for (client, name) in [(&self.alice, "Alice"), (&self.bob, "Bob")] {
            let profile = UserProfile::new(client.viewer()?, name);
            client.directory().register(&profile).await?;
        }

        // Alice is online, Bob is away.
        self.alice.start_session().await?;
        for i in 1..=self.messages {
            let text = format!("message {i} of {}", self.messages);
            match self.alice.send(&bob, &text).await {
                Ok(message) => tracing::info!(key = %message.id, seen = message.seen, "Alice sent {text:?}"),
                Err(err) => tracing::warn!(error = %err, "{}", err.user_message()),
            }
        }
        self.log_roster("Bob", &self.bob).await;

        // Bob comes back and reads.
        self.bob.start_session().await?;
        let history = self.bob.open_conversation(&alice).await?;
        for message in &history {
            tracing::info!(key = %message.id, sender = %message.sender_id, seen = message.seen, "Bob reads {:?}", message.text);
        }
        self.log_roster("Bob", &self.bob).await;

        // Bob replies while Alice is online: delivered and seen at once.
        match self.bob.send(&alice, "got them, thanks").await {
            Ok(reply) => tracing::info!(seen = reply.seen, "Bob replied"),
            Err(err) => tracing::warn!(error = %err, "{}", err.user_message()),
        }

        // Blocking stops both directions until lifted.
        self.bob.block(&alice).await?;
        match self.alice.send(&bob, "are you there?").await {
            Err(ChatError::Blocked { .. }) => {
                tracing::info!(status = ?self.alice.block_status(&bob).await?, "Alice is blocked");
            },
            Err(err) => tracing::warn!(error = %err, "Unexpected failure while blocked"),
            Ok(_) => tracing::error!("Send went through a block"),
        }
        self.bob.unblock(&alice).await?;

        // Alice's connection drops without a goodbye.
        let fired = self.alice_connection.drop_connection()?;
        let presence = self.bob.watch_presence(&alice).await?.try_next().transpose()?;
        if let Some(presence) = presence {
            let status = presence.status(self.env.wall_clock_millis());
            tracing::info!(fired, %status, "Bob sees Alice after Alice's connection dropped");
        }

        self.bob.end_session().await?;
        Ok(())
    }

    async fn log_roster(&self, name: &str, client: &Client<S>) {
        match client.roster().await {
            Ok(entries) => {
                for entry in entries {
                    tracing::info!(
                        partner = %entry.partner_name,
                        preview = entry.last_message_preview.as_deref().unwrap_or(""),
                        unread = entry.unread_count,
                        online = entry.online,
                        "{name}'s roster"
                    );
                }
            },
            Err(err) => tracing::warn!(error = %err, "{name}'s roster unavailable"),
        }
    }
}

//! Local demo: paywalled HTTP agents, an in-memory chain and escrow, and
//! two missions driven end to end

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use missionpay_coordinator::{
    callback_router, CallbackState, ChannelSink, Coordinator, InMemoryMissionStore,
    MissionConfig,
};
use missionpay_escrow::InMemoryEscrowLedger;
use missionpay_ledger::{InMemoryChain, Ledger};
use missionpay_protocol::{
    agent_router, BoundedSessionStore, FnHandler, HttpTransport, Keypair, PaymentGate,
    PaymentSigner, ProofVerifier, TaskClient,
};
use missionpay_types::{
    AccountId, AgentAssignment, AgentId, Amount, MissionMode, MissionPlan, PaymentRequest,
    SharedClock, SystemClock, TaskRequest, TaskResult,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::display;

const CLIENT: &str = "0xclient";
const FLOAT: &str = "0xcoordinator";

/// Bind an ephemeral local port and serve `router` on it
async fn serve(router: Router) -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("binding a local port")?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router).await {
            warn!(%addr, error = %err, "Server stopped");
        }
    });
    Ok(addr)
}

/// Work done by a demo agent once it has been paid
fn perform(name: &str, request: &TaskRequest) -> TaskResult {
    let context = request
        .task
        .split("Context from previous agents:")
        .nth(1)
        .map(str::trim);
    let output = match context {
        Some(context) => format!("{name} draft built on: {context}"),
        None => format!("{name} findings on '{}'", request.task),
    };
    TaskResult {
        output,
        deliverable: Some(format!("ipfs://{name}/{}", request.execution_id)),
        data: serde_json::json!({ "agent": name }),
    }
}

struct DemoEnv {
    config: MissionConfig,
    clock: SharedClock,
    verifier: Arc<ProofVerifier>,
}

impl DemoEnv {
    /// Serve one paywalled agent and return its assignment
    async fn agent(
        &self,
        name: &'static str,
        contracted: u64,
        price: u64,
        position: Option<u32>,
    ) -> anyhow::Result<(String, AgentAssignment)> {
        let account = AccountId::new(format!("0x{name}"));
        let gate = PaymentGate::new(
            PaymentRequest {
                amount: Amount(price),
                token: self.config.token_id(),
                recipient: account.clone(),
                network: self.config.network_id(),
                description: format!("{name} task"),
            },
            self.verifier.clone(),
            Arc::new(BoundedSessionStore::new(
                self.config.session_capacity,
                self.config.proof_freshness(),
                self.clock.clone(),
            )),
        );
        let handler = FnHandler(move |request: &TaskRequest| Ok(perform(name, request)));
        let router = agent_router(Arc::new(handler), Some(Arc::new(gate)))
            .layer(TraceLayer::new_for_http());

        let addr = serve(router).await?;
        info!(agent = name, %addr, price, "Agent listening");
        Ok((
            name.to_string(),
            AgentAssignment {
                agent_id: AgentId::new(),
                capability: name.to_string(),
                payment: Amount(contracted),
                position,
                endpoint: format!("http://{addr}/task"),
                account,
            },
        ))
    }
}

fn plan(
    mode: MissionMode,
    budget: u64,
    description: &str,
    agents: &[(String, AgentAssignment)],
) -> MissionPlan {
    MissionPlan {
        client: AccountId::new(CLIENT),
        mode,
        total_budget: Amount(budget),
        description: description.to_string(),
        requirements: "ipfs://demo/requirements".to_string(),
        assignments: agents.iter().map(|(_, a)| a.clone()).collect(),
    }
}

fn names(agents: &[(String, AgentAssignment)]) -> Vec<(String, AgentId)> {
    agents
        .iter()
        .map(|(name, a)| (name.clone(), a.agent_id.clone()))
        .collect()
}

pub async fn run(config: MissionConfig, approve: bool) -> anyhow::Result<()> {
    let clock: SharedClock = Arc::new(SystemClock);
    let token = config.token_id();

    let ledger = Ledger::new();
    ledger
        .deposit(&AccountId::new(CLIENT), &token, Amount(1_000), "faucet")
        .await
        .context("funding the client")?;
    ledger
        .deposit(&AccountId::new(FLOAT), &token, Amount(100), "faucet")
        .await
        .context("funding the payment float")?;

    let chain = InMemoryChain::with_clock(ledger.clone(), clock.clone());
    let verifier = Arc::new(
        ProofVerifier::new(Arc::new(chain.clone()), clock.clone())
            .with_freshness(config.proof_freshness()),
    );

    let store = Arc::new(InMemoryMissionStore::new());
    let (sink, _worker) = ChannelSink::spawn(store.clone());
    let callback_addr = serve(callback_router(CallbackState {
        store: store.clone(),
    }))
    .await?;

    let signer = PaymentSigner::new(
        Keypair::generate(),
        AccountId::new(FLOAT),
        config.network_id(),
        Arc::new(chain.clone()),
        config.confirmation_timeout(),
    )
    .spawn();
    let transport = HttpTransport::new(config.task_timeout()).context("building HTTP client")?;
    let caller = TaskClient::new(Arc::new(transport), signer).with_timeout(config.task_timeout());
    let escrow = Arc::new(
        InMemoryEscrowLedger::new(ledger.clone(), clock.clone())
            .with_auto_release_window(config.auto_release_window())
            .with_challenge_period(config.challenge_period()),
    );
    let coordinator = Coordinator::new(
        store.clone(),
        escrow.clone(),
        Arc::new(caller),
        config.clone(),
    )
    .with_sink(Arc::new(sink.clone()))
    .with_callback_url(format!("http://{callback_addr}/callbacks/executions"));

    let env = DemoEnv {
        config,
        clock,
        verifier,
    };

    display::section("Sequential mission: research, then writing");
    let agents = vec![
        env.agent("research", 8, 8, Some(1)).await?,
        env.agent("writer", 8, 8, Some(2)).await?,
    ];
    let result = coordinator
        .execute_mission(plan(MissionMode::Sequential, 20, "Report on lithium supply", &agents))
        .await?;
    display::mission(&result, &names(&agents));
    if approve && result.is_completed() {
        let receipt = coordinator.approve_deliverable(&result.mission_id).await?;
        display::success(&format!("Client approved, escrow {}", receipt.status));
    }

    display::section("Parallel mission: one agent asks more than its contract");
    let agents = vec![
        env.agent("charts", 5, 5, None).await?,
        env.agent("copy", 5, 9, None).await?,
        env.agent("layout", 5, 4, None).await?,
    ];
    let result = coordinator
        .execute_mission(plan(MissionMode::Parallel, 20, "Launch page for the report", &agents))
        .await?;
    display::mission(&result, &names(&agents));

    sink.flush().await;
    display::section("Balances");
    for account in [CLIENT, FLOAT, "0xresearch", "0xwriter", "0xcharts", "0xcopy", "0xlayout"] {
        let balance = ledger.balance(&AccountId::new(account), &token).await;
        display::kv(account, &balance.to_string());
    }
    let vault = ledger.balance(escrow.vault(), &token).await;
    display::kv("escrow vault", &vault.to_string());
    display::info(&format!(
        "{} missions recorded, {} ledger transfers",
        store.mission_count().await,
        chain.submitted_count()
    ));
    Ok(())
}

//! Demo CLI: builds a greeting pipeline and dispatches through it.
//!
//! ```text
//! switchyard-demo --context ana --vip ana --batch bob,ana,,claire@fr
//! RUST_LOG=switchyard=debug switchyard-demo --context ""
//! ```

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use switchyard::{
    filter, ChunkedRequest, ExecutionOrder, MethodSet, PipelineConfig, PipelineService, Service,
    ServiceFn, ServiceHost, ServicePipeline, ServiceType, TokioExecutor,
};
use tower::ServiceExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "switchyard-demo")]
#[command(about = "Dispatch greetings through an ordered service pipeline")]
#[command(version)]
struct Args {
    /// Context to greet.
    #[arg(long, default_value = "guest")]
    context: String,

    /// Context that receives the VIP greeting.
    #[arg(long, default_value = "VIP")]
    vip: String,

    /// Comma-separated contexts to dispatch as one batch.
    #[arg(long, value_delimiter = ',')]
    batch: Vec<String>,

    /// Label recorded on dispatch spans.
    #[arg(long, env = "SWITCHYARD_PIPELINE", default_value = "demo")]
    pipeline: String,

    /// Maximum concurrent pumps during a batch.
    #[arg(long, default_value_t = 8)]
    max_in_flight: usize,
}

// ---------------------------------------------------------------------------
// Service type and implementations
// ---------------------------------------------------------------------------

struct Greeting;

impl ServiceType for Greeting {
    type Context = String;
    type Result = String;
    const NAME: &'static str = "greeting";
}

struct VipGreeting;

impl Service<String, String> for VipGreeting {
    fn handle(&self, context: &String) -> anyhow::Result<Option<String>> {
        Ok(Some(format!("welcome back, {context}!")))
    }

    fn order(&self) -> ExecutionOrder {
        ExecutionOrder::First
    }

    fn name(&self) -> &str {
        "vip"
    }
}

/// Host object contributing greetings as methods.
struct Phrasebook;

impl Phrasebook {
    fn french(&self, context: &String) -> anyhow::Result<Option<String>> {
        Ok(context
            .strip_suffix("@fr")
            .map(|name| format!("bonjour, {name}")))
    }

    fn shout(&self, context: &String) -> anyhow::Result<Option<String>> {
        let loud = !context.is_empty() && context.chars().all(|c| !c.is_lowercase());
        Ok(loud.then(|| format!("HELLO, {context}")))
    }
}

impl ServiceHost for Phrasebook {
    fn methods(methods: &mut MethodSet<Self>) {
        methods
            .ordered_method::<Greeting>("french", ExecutionOrder::Soon, Self::french)
            .method::<Greeting>("shout", Self::shout);
    }
}

fn build_pipeline(args: &Args) -> anyhow::Result<ServicePipeline> {
    let executor = TokioExecutor::try_current().context("demo must run inside a tokio runtime")?;
    let pipeline = ServicePipeline::builder()
        .with_executor(executor)
        .with_config(PipelineConfig {
            name: args.pipeline.clone(),
            max_batch_in_flight: args.max_in_flight,
        })
        .build();

    let vip = args.vip.clone();
    pipeline
        .register_service_type::<Greeting, _>(
            ServiceFn::new(ExecutionOrder::Soon, |context: &String| -> anyhow::Result<Option<String>> {
                Ok(Some(format!("hello, {context}")))
            })
            .named("default"),
        )?
        .register_service_implementation::<Greeting, _>(
            VipGreeting,
            [filter(move |context: &String| *context == vip)],
        )?
        .register_service_implementation::<Greeting, _>(
            ServiceFn::new(ExecutionOrder::Sooner, |context: &String| -> anyhow::Result<Option<String>> {
                anyhow::ensure!(!context.is_empty(), "cannot greet an empty name");
                Ok(None)
            })
            .named("validate"),
            Vec::new(),
        )?
        .register_methods(Arc::new(Phrasebook))?;
    Ok(pipeline)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("switchyard=info")))
        .init();

    let args = Args::parse();
    let pipeline = Arc::new(build_pipeline(&args)?);

    let greeting = pipeline.pump::<Greeting>(args.context.clone())?.result_async().await;
    println!("{:>12}: {}", args.context, greeting.as_deref().unwrap_or("<no result>"));

    let via_tower = PipelineService::<Greeting>::new(Arc::clone(&pipeline))
        .oneshot(args.vip.clone())
        .await?;
    println!("{:>12}: {}", args.vip, via_tower.as_deref().unwrap_or("<no result>"));

    if !args.batch.is_empty() {
        let batch = ChunkedRequest::new(args.batch.clone())?;
        let stored = pipeline.pump_batch_async::<Greeting>(&batch).await?;
        println!("batch: {stored} answered, {} unanswered", batch.remaining_count());
        let mut results: Vec<_> = batch.available_results().into_iter().collect();
        results.sort();
        for (context, result) in results {
            println!("{context:>12}: {result}");
        }
    }

    let implementations = pipeline.implementations_of::<Greeting>()?;
    println!("{}", serde_json::to_string_pretty(&implementations)?);
    Ok(())
}

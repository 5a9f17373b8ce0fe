use clap::{Parser, Subcommand};
use labflow_core::constants::DEFAULT_DATA_DIR;
use labflow_core::{
    Actor, CoreConfig, DocumentFormat, DocumentGenerator, DraftPatch, DraftView,
    FileRequestRepository, HttpDocumentGenerator, LabService, NewTestRequest, PanelCatalog,
    PlainTextGenerator, ReleaseGateway, RequestStatus, ResultValue, ShardableUuid, StatusFilter,
    TestRequest,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "labflow")]
#[command(about = "Laboratory request lifecycle CLI")]
struct Cli {
    /// Data directory holding `requests/` (default: $LABFLOW_DATA_DIR or `lab_data`)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Panel definition directory (default: bundled panels)
    #[arg(long, global = true)]
    panel_dir: Option<PathBuf>,
    /// Document generation service URL (default: local plain-text renderer)
    #[arg(long, global = true)]
    document_url: Option<String>,
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Technician or clinician performing an action.
#[derive(clap::Args)]
struct ActorArgs {
    /// Full name
    #[arg(long)]
    name: String,
    /// Professional license number
    #[arg(long)]
    license: Option<String>,
}

impl From<ActorArgs> for Actor {
    fn from(args: ActorArgs) -> Self {
        Actor::new(args.name, args.license.unwrap_or_default())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List configured panels
    Panels,
    /// Register a new test request
    Create {
        /// Patient identifier
        #[arg(long)]
        patient: String,
        /// Panel id (see `labflow panels`)
        #[arg(long)]
        panel: String,
        /// Encounter identifier
        #[arg(long)]
        encounter: Option<String>,
        /// Register as already verified
        #[arg(long)]
        verified: bool,
        /// Requesting clinician
        #[arg(long)]
        requested_by: String,
    },
    /// List requests
    List {
        /// active, completed, final or all
        #[arg(long, default_value = "all")]
        status: String,
    },
    /// Show one request
    Show { request_id: String },
    /// Record specimen receipt
    Receive {
        request_id: String,
        #[command(flatten)]
        actor: ActorArgs,
    },
    /// Show the working draft with live flags
    Draft {
        request_id: String,
        #[command(flatten)]
        actor: ActorArgs,
    },
    /// Take over a draft claimed by another technician
    TakeOver {
        request_id: String,
        #[command(flatten)]
        actor: ActorArgs,
    },
    /// Give up your claim on a draft, keeping the entered values
    ReleaseClaim {
        request_id: String,
        #[command(flatten)]
        actor: ActorArgs,
    },
    /// Enter values into the draft (`key=value`; `key=` clears)
    Enter {
        request_id: String,
        #[command(flatten)]
        actor: ActorArgs,
        /// Remarks
        #[arg(long)]
        remarks: Option<String>,
        values: Vec<String>,
    },
    /// Finalize results
    Finalize {
        request_id: String,
        #[command(flatten)]
        actor: ActorArgs,
    },
    /// Release finalized results
    Release {
        request_id: String,
        #[command(flatten)]
        actor: ActorArgs,
    },
    /// Generate and store a document for finalized results
    Document {
        request_id: String,
        /// print or pdf
        #[arg(long, default_value = "print")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("labflow_core=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("Use 'labflow --help' for commands");
        return Ok(());
    };

    let data_dir = cli
        .data_dir
        .or_else(|| std::env::var("LABFLOW_DATA_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    let cfg = CoreConfig::new(data_dir, cli.panel_dir).with_document_service_url(cli.document_url)?;
    let service = open_service(&cfg)?;

    match command {
        Commands::Panels => {
            for panel in service.catalog().list() {
                let required = panel.required_parameters().count();
                println!(
                    "{}: {} ({} parameters, {} required)",
                    panel.panel_id,
                    panel.title,
                    panel.parameters.len(),
                    required
                );
            }
        }
        Commands::Create {
            patient,
            panel,
            encounter,
            verified,
            requested_by,
        } => {
            let request = service
                .create_request(NewTestRequest {
                    patient_id: patient,
                    encounter_id: encounter,
                    panel_id: panel,
                    status: if verified {
                        RequestStatus::Verified
                    } else {
                        RequestStatus::Requested
                    },
                    requested_by: Actor::named(requested_by),
                })
                .await?;
            println!("Created request {} ({})", request.request_id, request.status);
        }
        Commands::List { status } => {
            let filter: StatusFilter = status.parse()?;
            let requests = service.list_requests(filter)?;
            if requests.is_empty() {
                println!("No requests found.");
            }
            for request in requests {
                print_summary(&request);
            }
        }
        Commands::Show { request_id } => {
            let request = service.get_request(&parse_id(&request_id)?)?;
            print_summary(&request);
            if let Some(result) = &request.result {
                for flag in &result.flags {
                    println!("  {} = {} [{}]", flag.key, flag.value, flag.tier);
                }
                if let Some(remarks) = &result.remarks {
                    println!("  remarks: {remarks}");
                }
            }
        }
        Commands::Receive { request_id, actor } => {
            let request = service
                .receive_specimen(&parse_id(&request_id)?, &actor.into())
                .await?;
            println!("Request {} is now {}", request.request_id, request.status);
        }
        Commands::Draft { request_id, actor } => {
            let view = service
                .load_draft(&parse_id(&request_id)?, &actor.into())
                .await?;
            print_draft(&view);
        }
        Commands::TakeOver { request_id, actor } => {
            let view = service
                .take_over_draft(&parse_id(&request_id)?, &actor.into())
                .await?;
            print_draft(&view);
        }
        Commands::ReleaseClaim { request_id, actor } => {
            let view = service
                .release_draft_claim(&parse_id(&request_id)?, &actor.into())
                .await?;
            print_draft(&view);
        }
        Commands::Enter {
            request_id,
            actor,
            remarks,
            values,
        } => {
            let patch = parse_patch(&values, remarks)?;
            let view = service
                .save_draft(&parse_id(&request_id)?, &actor.into(), &patch)
                .await?;
            print_draft(&view);
        }
        Commands::Finalize { request_id, actor } => {
            let request = service
                .finalize(&parse_id(&request_id)?, &actor.into())
                .await?;
            println!("Request {} is now {}", request.request_id, request.status);
        }
        Commands::Release { request_id, actor } => {
            let request = service
                .release(&parse_id(&request_id)?, &actor.into())
                .await?;
            println!("Request {} is now {}", request.request_id, request.status);
        }
        Commands::Document { request_id, format } => {
            let format: DocumentFormat = format.parse()?;
            let handle = service
                .request_document(&parse_id(&request_id)?, format)
                .await?;
            println!(
                "Stored {} ({} bytes) at {}",
                handle.file.name, handle.file.size_bytes, handle.file.relative_path
            );
        }
    }

    Ok(())
}

fn open_service(cfg: &CoreConfig) -> anyhow::Result<LabService> {
    let catalog = PanelCatalog::load(cfg.panel_dir())?;
    let repository = FileRequestRepository::open(cfg.requests_dir())?;
    let generator: Arc<dyn DocumentGenerator> = match cfg.document_service_url() {
        Some(url) => Arc::new(HttpDocumentGenerator::new(url)),
        None => Arc::new(PlainTextGenerator),
    };
    let gateway = ReleaseGateway::new(cfg, generator);
    Ok(LabService::new(
        Arc::new(catalog),
        Arc::new(repository),
        Arc::new(gateway),
    )?)
}

fn parse_id(input: &str) -> anyhow::Result<ShardableUuid> {
    Ok(ShardableUuid::parse(input)?)
}

/// `key=value` pairs into a patch. Numbers are stored as numbers, anything else as text and an
/// empty value clears the slot.
fn parse_patch(pairs: &[String], remarks: Option<String>) -> anyhow::Result<DraftPatch> {
    let mut patch = DraftPatch::default();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            anyhow::bail!("expected key=value, got '{pair}'");
        };
        let key = key.trim();
        let value = value.trim();
        patch = if value.is_empty() {
            patch.clear(key)
        } else if let Ok(number) = value.parse::<f64>() {
            patch.set(key, ResultValue::Number(number))
        } else {
            patch.set(key, ResultValue::from(value))
        };
    }
    if let Some(remarks) = remarks {
        patch = patch.remarks(remarks);
    }
    Ok(patch)
}

fn print_summary(request: &TestRequest) {
    println!(
        "ID: {}, Patient: {}, Panel: {}, Status: {}, Created: {}",
        request.request_id,
        request.patient_id,
        request.panel_id,
        request.status,
        request.timestamps.created_at.to_rfc3339()
    );
}

fn print_draft(view: &DraftView) {
    let draft = &view.draft;
    match &draft.owner {
        Some(owner) => println!("Draft for {} (encoded by {})", draft.request_id, owner.name),
        None => println!("Draft for {}", draft.request_id),
    }
    for (key, value) in &draft.values {
        let flag = view.flags.iter().find(|f| &f.key == key);
        match (value, flag) {
            (Some(value), Some(flag)) => println!("  {key} = {value} [{}]", flag.tier),
            (Some(value), None) => println!("  {key} = {value}"),
            (None, _) => println!("  {key} = -"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numbers_text_and_clears() {
        let pairs = vec![
            "hemoglobin=9.5".to_string(),
            "color = yellow".to_string(),
            "wbc=".to_string(),
        ];
        let patch = parse_patch(&pairs, Some("hemolysed".into())).unwrap();
        assert_eq!(patch.values["hemoglobin"], Some(ResultValue::Number(9.5)));
        assert_eq!(patch.values["color"], Some(ResultValue::from("yellow")));
        assert_eq!(patch.values["wbc"], None);
        assert_eq!(patch.remarks.as_deref(), Some("hemolysed"));
    }

    #[test]
    fn rejects_pairs_without_equals() {
        assert!(parse_patch(&["hemoglobin".to_string()], None).is_err());
    }

    #[test]
    fn draft_commands_take_the_viewing_technician() {
        let cli = Cli::try_parse_from([
            "labflow",
            "take-over",
            "0123456789abcdef0123456789abcdef",
            "--name",
            "Maria Lim",
            "--license",
            "PRC-0099887",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::TakeOver { actor, .. }) => {
                assert_eq!(actor.name, "Maria Lim");
                assert_eq!(actor.license.as_deref(), Some("PRC-0099887"));
            }
            _ => panic!("expected take-over"),
        }
        assert!(Cli::try_parse_from(["labflow", "draft", "0123456789abcdef0123456789abcdef"]).is_err());
    }

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

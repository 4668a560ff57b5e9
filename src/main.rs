use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{fmt, EnvFilter};

use warrant::authz::loader::{compile_permissions, load_policies};
use warrant::authz::memory::{filter, MemoryQueryBuilder};
use warrant::authz::{
    AuthorizationRequest, AuthorizationService, PermissionSet, Principal, Registry, ResourceType,
    Value,
};
use warrant::catalog::{build_registry, Catalog};
use warrant::errors::WarrantError;
use warrant::settings::Settings;

#[derive(Parser, Debug)]
#[command(
    name = "warrant",
    version,
    about = "Check permissions and compile record filters from KDL policies"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "warrant.toml")]
    config: String,

    /// Policy directory (overrides `policies.dir`)
    #[arg(long)]
    policies: Option<PathBuf>,

    /// Record catalog (overrides `catalog.path`)
    #[arg(long)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decide whether the principal may act on one catalog record.
    Check {
        #[command(flatten)]
        request: RequestArgs,

        /// Id of the record to check
        #[arg(long)]
        id: String,
    },

    /// Print the compiled predicate and the catalog records it selects.
    Filter {
        #[command(flatten)]
        request: RequestArgs,
    },

    /// Load policies and catalog, then report what was found.
    Validate,
}

#[derive(Args, Debug)]
struct RequestArgs {
    /// Resource type name
    #[arg(long = "type")]
    resource_type: String,

    /// Action key, e.g. "view"
    #[arg(long)]
    action: String,

    /// Principal id
    #[arg(long)]
    principal: String,

    /// Held role; repeat for several
    #[arg(long = "role")]
    roles: Vec<String>,

    /// Principal attribute as key=value; the value is read as JSON when it parses
    #[arg(long = "attr", value_parser = parse_attribute)]
    attributes: Vec<(String, Value)>,
}

impl RequestArgs {
    fn to_principal(&self) -> Principal {
        let mut principal = Principal::new(self.principal.clone());
        for role in &self.roles {
            principal = principal.with_role(role.clone());
        }
        for (name, value) in &self.attributes {
            principal = principal.with_attribute(name.clone(), value.clone());
        }
        principal
    }
}

fn parse_attribute(raw: &str) -> std::result::Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))?;
    let value = serde_json::from_str::<serde_json::Value>(value)
        .map(|json| Value::from_json(&json))
        .unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.trim().to_string(), value))
}

struct Loaded {
    catalog: Arc<Catalog>,
    registry: Arc<Registry>,
    permissions: PermissionSet,
}

fn load(settings: &Settings) -> Result<Loaded> {
    let policy = load_policies(&settings.policies.dir)?;
    let catalog = Arc::new(Catalog::load(&settings.catalog.path)?);
    let registry = Arc::new(build_registry(&policy.resources, catalog.clone())?);
    let permissions = compile_permissions(&registry, &policy)?;
    Ok(Loaded {
        catalog,
        registry,
        permissions,
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // load settings
    let mut settings = Settings::load(&cli.config)?;
    if let Some(dir) = cli.policies {
        settings.policies.dir = dir;
    }
    if let Some(path) = cli.catalog {
        settings.catalog.path = path;
    }

    // logging
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.filter));
    fmt().with_env_filter(env_filter).with_writer(std::io::stderr).init();
    tracing::debug!(?settings, "Loaded configuration");

    let loaded = load(&settings)?;
    let service = AuthorizationService::new(loaded.registry.clone());

    match cli.command {
        Command::Check { request, id } => {
            let resource_type = ResourceType::new(request.resource_type.as_str());
            let principal = request.to_principal();
            let record = loaded.catalog.find(&resource_type, &id).ok_or_else(|| {
                WarrantError::BadRequest(format!("no `{resource_type}` record with id `{id}`"))
            })?;

            let req = AuthorizationRequest::new(&principal, &resource_type, &request.action);
            let decision = service.check(&loaded.permissions, &req, &*record)?;

            println!("{}", if decision.granted { "granted" } else { "denied" });
            for permission in &decision.granted_by {
                println!("  by {permission}");
            }
        }
        Command::Filter { request } => {
            let resource_type = ResourceType::new(request.resource_type.as_str());
            let principal = request.to_principal();
            let req = AuthorizationRequest::new(&principal, &resource_type, &request.action);
            let builder = MemoryQueryBuilder::new(&loaded.registry, resource_type.clone());
            let compiled = service.compile_predicate(&loaded.permissions, &req, &builder)?;

            let Some(predicate) = compiled.predicate else {
                println!("always denied");
                return Ok(());
            };
            println!("predicate: {predicate}");
            let visible = filter(
                &predicate,
                &*loaded.registry,
                loaded.catalog.records(&resource_type),
            )?;
            for record in visible {
                println!("{}", record.id());
            }
        }
        Command::Validate => {
            let mut types: Vec<&ResourceType> = loaded.registry.resource_types().collect();
            types.sort();
            for resource_type in types {
                let actions = loaded.registry.actions().actions_for(resource_type)?;
                let keys: Vec<&str> = actions.iter().map(|a| a.key.as_str()).collect();
                println!(
                    "{resource_type}: {} record(s), actions [{}]",
                    loaded.catalog.records(resource_type).len(),
                    keys.join(", ")
                );
            }
            println!("{} permission(s)", loaded.permissions.len());
        }
    }

    Ok(())
}

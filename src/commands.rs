//! Command execution.

use crate::Commands;
use colored::Colorize;
use serde_json::Value;
use statewise_core::{
    Actor, CoreError, Definition, DefinitionDocument, Instance, InstanceRepository,
    TransitionEngine, TransitionInfo,
};
use statewise_storage::{FileStore, Store};
use std::error::Error;
use std::path::Path;
use std::sync::Arc;

/// Everything a command needs.
pub struct App {
    store: Arc<FileStore>,
    engine: TransitionEngine,
    default_actor: Actor,
}

impl App {
    pub fn new(store: Arc<FileStore>, engine: TransitionEngine, default_actor: &str) -> Self {
        Self {
            store,
            engine,
            default_actor: Actor::from(default_actor),
        }
    }

    fn actor(&self, actor: Option<String>) -> Actor {
        actor.map(Actor::from).unwrap_or_else(|| self.default_actor.clone())
    }
}

/// Executes a command and returns the formatted output.
pub async fn execute(app: &App, cmd: Commands) -> Result<String, Box<dyn Error>> {
    match cmd {
        Commands::Import { file, publish } => {
            let mut definition = read_definition(&file)?;
            if publish {
                definition.publish().map_err(describe)?;
            }
            let mut warnings = definition.validate();
            warnings.extend(
                app.engine
                    .registry()
                    .missing_handlers(&definition)
                    .into_iter()
                    .map(|kind| format!("no handler registered for {}", kind)),
            );
            app.store.save_definition(&definition)?;

            let mut output = format!(
                "{} {} v{} ({}) as {}",
                "Imported".green(),
                definition.name().cyan(),
                definition.version(),
                format!("{:?}", definition.status()).to_lowercase(),
                definition.id()
            );
            push_warnings(&mut output, &warnings);
            Ok(output)
        }

        Commands::Validate { file } => {
            let definition = read_definition(&file)?;
            let warnings = definition.validate();
            if warnings.is_empty() {
                return Ok(format!("{} {}", "Valid".green(), definition.name().cyan()));
            }
            let mut output = format!(
                "{} with {} warning(s)",
                definition.name().cyan(),
                warnings.len()
            );
            push_warnings(&mut output, &warnings);
            Ok(output)
        }

        Commands::Diagram {
            definition,
            instance,
        } => match instance {
            Some(id) => {
                let instance = app.store.load_instance(id)?;
                if instance.definition().id() != definition {
                    return Err(format!(
                        "instance {} belongs to definition {}, not {}",
                        id,
                        instance.definition().id(),
                        definition
                    )
                    .into());
                }
                Ok(instance
                    .definition()
                    .to_mermaid_diagram(Some(instance.current_state_id())))
            }
            None => Ok(app.store.load_definition(definition)?.to_mermaid_diagram(None)),
        },

        Commands::NewVersion {
            definition,
            version,
        } => {
            let current = app.store.load_definition(definition)?;
            let version = version.unwrap_or(current.version() + 1);
            let next = current.create_new_version(version).map_err(describe)?;
            app.store.save_definition(&next)?;
            Ok(format!(
                "{} {} v{} as {}",
                "Created draft".green(),
                next.name().cyan(),
                next.version(),
                next.id()
            ))
        }

        Commands::Publish { definition } => {
            let mut definition = Definition::clone(&*app.store.load_definition(definition)?);
            definition.publish().map_err(describe)?;
            app.store.save_definition(&definition)?;
            Ok(format!(
                "{} {} v{}",
                "Published".green(),
                definition.name().cyan(),
                definition.version()
            ))
        }

        Commands::List => {
            let definitions = app.store.list_definitions()?;
            let instances = app.store.list_instances()?;
            if definitions.is_empty() {
                return Ok("No definitions stored".yellow().to_string());
            }

            let mut output = "Definitions".bold().to_string();
            for def in &definitions {
                output.push_str(&format!(
                    "\n  {} {} v{} [{}]",
                    def.id(),
                    def.name().cyan(),
                    def.version(),
                    format!("{:?}", def.status()).to_lowercase()
                ));
            }

            output.push_str(&format!("\n{}", "Instances".bold()));
            if instances.is_empty() {
                output.push_str(&format!("\n  {}", "none".dimmed()));
            }
            for record in &instances {
                let (name, state) = definitions
                    .iter()
                    .find(|d| d.id() == record.definition_id)
                    .map(|d| (d.name().to_string(), d.state_name(record.current_state_id)))
                    .unwrap_or_else(|| ("?".to_string(), record.current_state_id.to_string()));
                output.push_str(&format!(
                    "\n  {} {} v{} in {}",
                    record.id,
                    name.cyan(),
                    record.definition_version,
                    state.yellow()
                ));
            }
            Ok(output)
        }

        Commands::Create { definition } => {
            let definition = app.store.load_definition(definition)?;
            let instance = Instance::create(definition).map_err(describe)?;
            app.store.save_instance(&instance).await?;
            Ok(format!(
                "{} instance {} in {}",
                "Created".green(),
                instance.id(),
                state_of(&instance).yellow()
            ))
        }

        Commands::Fire {
            instance,
            trigger,
            actor,
            ctx,
        } => {
            let context = ctx.map(|c| parse_json_arg(&c)).transpose()?;
            let mut instance = app.store.load_instance(instance)?;
            let info = app
                .engine
                .try_transition_by_name(
                    &mut instance,
                    &trigger,
                    &app.actor(actor),
                    context.as_ref(),
                )
                .await
                .map_err(describe)?;
            Ok(format_transition(&instance, &info))
        }

        Commands::Force {
            instance,
            state,
            reason,
            actor,
        } => {
            let mut instance = app.store.load_instance(instance)?;
            let info = app
                .engine
                .force_transition_by_name(&mut instance, &state, &reason, &app.actor(actor))
                .await
                .map_err(describe)?;
            Ok(format_transition(&instance, &info))
        }

        Commands::Revert {
            instance,
            count,
            reason,
            actor,
        } => {
            let mut instance = app.store.load_instance(instance)?;
            let info = app
                .engine
                .revert_transitions(&mut instance, count, &reason, &app.actor(actor))
                .await
                .map_err(describe)?;
            Ok(format!(
                "{} {} transition(s): {} -> {}",
                "Reverted".green(),
                info.reverted_entries.len(),
                instance.definition().state_name(info.previous_state_id),
                state_of(&instance).yellow()
            ))
        }

        Commands::Show { instance } => {
            let instance = app.store.load_instance(instance)?;
            let definition = instance.definition();
            let mut output = format!(
                "{}\n  definition: {} v{}\n  state: {}\n  token: {}",
                format!("Instance {}", instance.id()).bold(),
                definition.name().cyan(),
                definition.version(),
                state_of(&instance).yellow(),
                instance.concurrency_token()
            );

            output.push_str(&format!("\n{}", "History".bold()));
            for entry in instance.history() {
                let label = match entry.trigger_id() {
                    Some(trigger) => definition.trigger_name(trigger),
                    None => "forced".to_string(),
                };
                let line = format!(
                    "{} {} -> {} ({}) by {}",
                    entry.transitioned_at().format("%Y-%m-%d %H:%M:%S"),
                    definition.state_name(entry.from_state_id()),
                    definition.state_name(entry.to_state_id()),
                    label,
                    entry.actor()
                );
                if entry.is_reverted() {
                    output.push_str(&format!(
                        "\n  {} [reverted: {}]",
                        line.dimmed(),
                        entry.revert_reason().unwrap_or("")
                    ));
                } else {
                    output.push_str(&format!("\n  {}", line));
                }
            }

            output.push_str(&format!("\n{}", "Available".bold()));
            for available in app.engine.available_transitions(&instance, None).await {
                let target = available
                    .to_state
                    .as_ref()
                    .map(|s| s.name().to_string())
                    .unwrap_or_else(|| state_of(&instance));
                let marker = if available.can_execute {
                    "ready".green()
                } else {
                    "blocked".red()
                };
                output.push_str(&format!(
                    "\n  {} -> {} [{}]",
                    available.trigger.name().cyan(),
                    target,
                    marker
                ));
            }
            Ok(output)
        }
    }
}

/// Parses a YAML or JSON definition document.
fn read_definition(path: &Path) -> Result<Definition, Box<dyn Error>> {
    let content = std::fs::read_to_string(path)?;
    let document: DefinitionDocument = serde_yaml::from_str(&content)?;
    Ok(Definition::from_document(document).map_err(describe)?)
}

/// Parses a JSON argument (or reads from file if prefixed with @).
fn parse_json_arg(arg: &str) -> Result<Value, Box<dyn Error>> {
    if let Some(path) = arg.strip_prefix('@') {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_json::from_str(arg)?)
    }
}

/// Adds the error code and, for unmet requirements, every reason.
fn describe(e: CoreError) -> Box<dyn Error> {
    let mut message = format!("{} [{}]", e, e.error_code());
    for reason in e.failure_reasons() {
        message.push_str(&format!("\n  - {}", reason));
    }
    message.into()
}

fn state_of(instance: &Instance) -> String {
    instance.definition().state_name(instance.current_state_id())
}

fn push_warnings(output: &mut String, warnings: &[String]) {
    for warning in warnings {
        output.push_str(&format!("\n  {} {}", "warning:".yellow(), warning));
    }
}

fn format_transition(instance: &Instance, info: &TransitionInfo) -> String {
    let definition = instance.definition();
    let verb = if info.was_forced {
        "Forced".yellow()
    } else {
        "Transitioned".green()
    };
    let mut output = format!(
        "{} {} -> {}",
        verb,
        definition.state_name(info.previous_state_id),
        definition.state_name(info.new_state_id).yellow()
    );

    if let Some(execution) = &info.effect_execution {
        output.push_str(&format!(
            "\n  effects: {} ok, {} failed",
            execution.success_count, execution.failure_count
        ));
        for result in execution.results.iter().filter(|r| !r.is_executed) {
            for error in &result.errors {
                output.push_str(&format!("\n  {} {}", "failed:".red(), error));
            }
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use statewise_core::{BuiltinHandlers, DefinitionId, HandlerRegistry};
    use tempfile::TempDir;

    const DOCUMENT: &str = r#"
name: ticket
states:
  - name: Open
    category: initial
  - name: Done
    category: final
transitions:
  - trigger: finish
    from: Open
    to: Done
    requirements:
      - kind: context_flag
        params:
          path: tests.green
"#;

    fn app(dir: &Path) -> App {
        let store = Arc::new(FileStore::open(dir.join("data")).unwrap());
        let mut registry = HandlerRegistry::new();
        registry.install(&BuiltinHandlers);
        let engine = TransitionEngine::new(Arc::new(registry), store.clone());
        App::new(store, engine, "tester")
    }

    #[tokio::test]
    async fn test_import_create_fire() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("ticket.yaml");
        std::fs::write(&file, DOCUMENT).unwrap();
        let app = app(dir.path());

        execute(&app, Commands::Import { file, publish: true })
            .await
            .unwrap();
        let definition = app.store.list_definitions().unwrap()[0].clone();

        execute(
            &app,
            Commands::Create {
                definition: definition.id(),
            },
        )
        .await
        .unwrap();
        let id = app.store.list_instances().unwrap()[0].id;

        let err = execute(
            &app,
            Commands::Fire {
                instance: id,
                trigger: "finish".into(),
                actor: None,
                ctx: Some(r#"{"tests": {"green": false}}"#.into()),
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Transition.RequirementsNotMet"));

        execute(
            &app,
            Commands::Fire {
                instance: id,
                trigger: "finish".into(),
                actor: None,
                ctx: Some(r#"{"tests": {"green": true}}"#.into()),
            },
        )
        .await
        .unwrap();

        let instance = app.store.load_instance(id).unwrap();
        assert_eq!(state_of(&instance), "Done");
        assert_eq!(instance.history()[0].actor().as_str(), "tester");
    }

    #[tokio::test]
    async fn test_draft_rejects_instances() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("ticket.yaml");
        std::fs::write(&file, DOCUMENT).unwrap();
        let app = app(dir.path());

        execute(&app, Commands::Import { file, publish: false })
            .await
            .unwrap();
        let definition = app.store.list_definitions().unwrap()[0].id();

        let err = execute(&app, Commands::Create { definition })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Definition.NotPublished"));

        execute(&app, Commands::Publish { definition }).await.unwrap();
        execute(&app, Commands::Create { definition }).await.unwrap();
    }

    #[tokio::test]
    async fn test_diagram_checks_instance_definition() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("ticket.yaml");
        std::fs::write(&file, DOCUMENT).unwrap();
        let app = app(dir.path());

        execute(&app, Commands::Import { file, publish: true })
            .await
            .unwrap();
        let definition = app.store.list_definitions().unwrap()[0].id();
        execute(&app, Commands::Create { definition })
            .await
            .unwrap();
        let instance = app.store.list_instances().unwrap()[0].id;

        let diagram = execute(
            &app,
            Commands::Diagram {
                definition,
                instance: Some(instance),
            },
        )
        .await
        .unwrap();
        assert!(diagram.contains("classDef current"));

        let other = DefinitionId::new();
        let err = execute(
            &app,
            Commands::Diagram {
                definition: other,
                instance: Some(instance),
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("belongs to definition"));
    }
}

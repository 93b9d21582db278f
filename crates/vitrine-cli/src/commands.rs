use std::path::Path;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde_json::json;
use vitrine_store::{
    CleanupReport, ContentStore, ImageKey, NewProject, Project, ProjectId, ProjectPatch,
    StoreConfig,
};
use vitrine_types::validate_coordinates;

use crate::cli::*;

const DEFAULT_CONFIG: &str = "vitrine.toml";

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let store = ContentStore::from_config(&config);
    dispatch(&store, cli.command, cli.format).await
}

fn load_config(cli: &Cli) -> anyhow::Result<StoreConfig> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG).exists() => StoreConfig::load(Path::new(DEFAULT_CONFIG))
            .with_context(|| format!("loading {DEFAULT_CONFIG}"))?,
        None => StoreConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

async fn dispatch(store: &ContentStore, command: Command, format: OutputFormat) -> anyhow::Result<()> {
    match command {
        Command::Image(args) => cmd_image(store, args.action, format).await,
        Command::Hero(args) => cmd_hero(store, args.action, format).await,
        Command::Gallery(args) => cmd_gallery(store, args.action, format).await,
        Command::Project(args) => cmd_project(store, args.action, format).await,
        Command::Gc(args) => cmd_gc(store, args, format).await,
    }
}

fn keys(raw: Vec<String>) -> Vec<ImageKey> {
    raw.into_iter().map(ImageKey::from).collect()
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Unix millis as a UTC timestamp; `-` for records without one.
fn format_millis(ms: u64) -> String {
    i64::try_from(ms)
        .ok()
        .filter(|ms| *ms > 0)
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "-".into())
}

async fn cmd_image(store: &ContentStore, action: ImageAction, format: OutputFormat) -> anyhow::Result<()> {
    match action {
        ImageAction::Put { file, gallery } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let len = bytes.len();
            let key = store.store_image(bytes).await.context("storing image")?;
            if gallery {
                store
                    .add_gallery_images(vec![key.clone()])
                    .await
                    .context("adding image to gallery")?;
            }
            match format {
                OutputFormat::Json => print_json(&json!({ "key": key, "bytes": len, "gallery": gallery })),
                OutputFormat::Text => {
                    println!("{} Stored {} ({} bytes)", "✓".green().bold(), key.to_string().yellow(), len);
                    if gallery {
                        println!("  Added to gallery");
                    }
                    Ok(())
                }
            }
        }
        ImageAction::Show { key, output } => {
            let key = ImageKey::from(key);
            let Some(handle) = store.get_image_handle(&key).await.context("reading image")? else {
                bail!("no image stored under {key}");
            };
            let bytes = handle.bytes().unwrap_or_default();
            if let Some(path) = &output {
                tokio::fs::write(path, &bytes)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?;
            }
            match format {
                OutputFormat::Json => print_json(&json!({
                    "key": handle.key(),
                    "url": handle.url(),
                    "bytes": bytes.len(),
                })),
                OutputFormat::Text => {
                    println!("Image {}", handle.key().to_string().yellow().bold());
                    println!("  URL: {}", handle.url().cyan());
                    println!("  Size: {} bytes", bytes.len());
                    if let Some(path) = output {
                        println!("  Written to {}", path.display());
                    }
                    Ok(())
                }
            }
        }
        ImageAction::Refs { key } => {
            let key = ImageKey::from(key);
            let index = store.reference_index().await.context("building reference index")?;
            let referrers = index.referrers(&key);
            match format {
                OutputFormat::Json => print_json(&json!({ "key": key, "referrers": referrers })),
                OutputFormat::Text => {
                    if referrers.is_empty() {
                        println!("{} is {}", key.to_string().yellow(), "unreferenced".dimmed());
                    }
                    for referrer in referrers {
                        match referrer {
                            vitrine_store::Referrer::HeroSlide { slot } => println!("  hero slide {}", slot + 1),
                            vitrine_store::Referrer::Gallery { position } => println!("  gallery #{}", position + 1),
                            vitrine_store::Referrer::Project { id } => println!("  project {}", id.to_string().cyan()),
                        }
                    }
                    Ok(())
                }
            }
        }
        ImageAction::List => {
            let mut stored = store.image_keys().await.context("listing images")?;
            stored.sort();
            match format {
                OutputFormat::Json => print_json(&stored),
                OutputFormat::Text => {
                    for key in &stored {
                        println!("{key}");
                    }
                    println!("{} images", stored.len().to_string().bold());
                    Ok(())
                }
            }
        }
    }
}

async fn cmd_hero(store: &ContentStore, action: HeroAction, format: OutputFormat) -> anyhow::Result<()> {
    match action {
        HeroAction::Set { keys: raw } => {
            store.set_hero_slides(keys(raw)).await.context("setting hero slides")?;
            if format == OutputFormat::Text {
                println!("{} Hero slides updated", "✓".green().bold());
            }
            Ok(())
        }
        HeroAction::Show => {
            let slides = store.get_hero_slides().await.context("reading hero slides")?;
            match (format, slides) {
                (OutputFormat::Json, slides) => print_json(&slides),
                (OutputFormat::Text, None) => {
                    println!("Hero slides not set.");
                    Ok(())
                }
                (OutputFormat::Text, Some(slides)) => {
                    for (slot, key) in slides.keys().iter().enumerate() {
                        println!("  {}. {}", slot + 1, key.to_string().yellow());
                    }
                    Ok(())
                }
            }
        }
    }
}

async fn cmd_gallery(store: &ContentStore, action: GalleryAction, format: OutputFormat) -> anyhow::Result<()> {
    match action {
        GalleryAction::Add { keys: raw } => {
            let added = raw.len();
            store.add_gallery_images(keys(raw)).await.context("adding gallery images")?;
            if format == OutputFormat::Text {
                println!("{} Added {} images to the gallery", "✓".green().bold(), added);
            }
            Ok(())
        }
        GalleryAction::Remove { keys: raw } => {
            let report = store
                .remove_gallery_images(&keys(raw))
                .await
                .context("removing gallery images")?;
            print_report("Gallery cleanup", &report, format)
        }
        GalleryAction::Show => {
            let gallery = store.get_gallery_images().await.context("reading gallery")?;
            match format {
                OutputFormat::Json => print_json(&gallery),
                OutputFormat::Text => {
                    if gallery.is_empty() {
                        println!("Gallery is empty.");
                    }
                    for (i, key) in gallery.iter().enumerate() {
                        println!("  {:>3}. {}", i + 1, key.to_string().yellow());
                    }
                    Ok(())
                }
            }
        }
    }
}

async fn cmd_project(store: &ContentStore, action: ProjectAction, format: OutputFormat) -> anyhow::Result<()> {
    match action {
        ProjectAction::Add { name, lat, lng, images } => {
            validate_coordinates(lat, lng)?;
            let id = store
                .add_project(NewProject::new(name, lat, lng, keys(images)))
                .await
                .context("adding project")?;
            match format {
                OutputFormat::Json => print_json(&json!({ "id": id })),
                OutputFormat::Text => {
                    println!("{} Created project {}", "✓".green().bold(), id.to_string().cyan());
                    Ok(())
                }
            }
        }
        ProjectAction::List => {
            let projects = store.get_projects().await.context("listing projects")?;
            match format {
                OutputFormat::Json => print_json(&projects),
                OutputFormat::Text => {
                    if projects.is_empty() {
                        println!("No projects.");
                    }
                    for p in &projects {
                        println!(
                            "{}  {}  ({} images, updated {})",
                            p.id.to_string().cyan(),
                            p.name.bold(),
                            p.image_keys.len(),
                            format_millis(p.updated_at).dimmed()
                        );
                    }
                    Ok(())
                }
            }
        }
        ProjectAction::Show { id } => {
            let id = ProjectId::from(id);
            let Some(project) = store.get_project(&id).await.context("reading project")? else {
                bail!("project not found: {id}");
            };
            match format {
                OutputFormat::Json => print_json(&project),
                OutputFormat::Text => {
                    print_project(&project);
                    Ok(())
                }
            }
        }
        ProjectAction::Update { id, name, lat, lng, images, keep_images } => {
            let id = ProjectId::from(id);
            let mut patch = ProjectPatch::new();
            if let Some(name) = name {
                patch = patch.name(name);
            }
            if let (Some(lat), Some(lng)) = (lat, lng) {
                validate_coordinates(lat, lng)?;
                patch = patch.location(lat, lng);
            }
            if !images.is_empty() {
                patch = patch.image_keys(keys(images));
            }
            if patch.is_empty() {
                bail!("nothing to update; pass --name, --lat/--lng or --image");
            }
            let (project, report) = if keep_images {
                let project = store.update_project(&id, patch).await;
                (project.with_context(|| format!("updating project {id}"))?, CleanupReport::new())
            } else {
                store
                    .update_project_and_prune(&id, patch)
                    .await
                    .with_context(|| format!("updating project {id}"))?
            };
            match format {
                OutputFormat::Json => print_json(&json!({ "project": project, "cleanup": report })),
                OutputFormat::Text => {
                    println!("{} Updated project {}", "✓".green().bold(), id.to_string().cyan());
                    print_project(&project);
                    if report.attempted() > 0 {
                        print_report("Image cleanup", &report, format)?;
                    }
                    Ok(())
                }
            }
        }
        ProjectAction::Delete { id } => {
            let id = ProjectId::from(id);
            let report = store
                .delete_project(&id)
                .await
                .with_context(|| format!("deleting project {id}"))?;
            if format == OutputFormat::Text {
                println!("{} Deleted project {}", "✓".green().bold(), id.to_string().cyan());
            }
            print_report("Image cleanup", &report, format)
        }
    }
}

async fn cmd_gc(store: &ContentStore, args: GcArgs, format: OutputFormat) -> anyhow::Result<()> {
    if args.dry_run {
        let index = store.reference_index().await.context("building reference index")?;
        let mut orphans: Vec<ImageKey> = store
            .image_keys()
            .await
            .context("listing images")?
            .into_iter()
            .filter(|k| !index.contains(k))
            .collect();
        orphans.sort();
        return match format {
            OutputFormat::Json => print_json(&orphans),
            OutputFormat::Text => {
                for key in &orphans {
                    println!("  would delete {}", key.to_string().yellow());
                }
                println!("{} orphaned images", orphans.len().to_string().bold());
                Ok(())
            }
        };
    }
    let report = store.collect_garbage().await.context("collecting garbage")?;
    print_report("GC", &report, format)
}

fn print_project(project: &Project) {
    println!("Project {}", project.id.to_string().cyan().bold());
    println!("  Name: {}", project.name);
    println!("  Location: {:.5}, {:.5}", project.lat, project.lng);
    println!("  Created: {}", format_millis(project.created_at));
    println!("  Updated: {}", format_millis(project.updated_at));
    for key in &project.image_keys {
        println!("  Image: {}", key.to_string().yellow());
    }
}

fn print_report(label: &str, report: &CleanupReport, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(report);
    }
    let mark = if report.is_complete() { "✓".green().bold() } else { "!".red().bold() };
    println!(
        "{} {}: {} deleted, {} kept, {} already gone",
        mark,
        label,
        report.deleted.len(),
        report.retained.len(),
        report.absent.len()
    );
    for failure in &report.failed {
        println!("  {} {}: {}", "failed".red(), failure.key, failure.error);
    }
    Ok(())
}

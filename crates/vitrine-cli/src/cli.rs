use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "vitrine",
    about = "Vitrine — local content store for a showcase site",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Config file (defaults to ./vitrine.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the filesystem backend's data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Store, inspect and trace image blobs
    Image(ImageArgs),
    /// Set or show the five hero slides
    Hero(HeroArgs),
    /// Manage the gallery list
    Gallery(GalleryArgs),
    /// Manage projects
    Project(ProjectArgs),
    /// Delete every image nothing references
    Gc(GcArgs),
}

#[derive(Args)]
pub struct ImageArgs {
    #[command(subcommand)]
    pub action: ImageAction,
}

#[derive(Subcommand)]
pub enum ImageAction {
    /// Store an image file and print its key
    Put {
        file: PathBuf,
        /// Also put the new image at the front of the gallery
        #[arg(long)]
        gallery: bool,
    },
    /// Show an image's display handle, optionally writing its bytes out
    Show {
        key: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List what references an image
    Refs { key: String },
    /// List every stored image key
    List,
}

#[derive(Args)]
pub struct HeroArgs {
    #[command(subcommand)]
    pub action: HeroAction,
}

#[derive(Subcommand)]
pub enum HeroAction {
    /// Replace all five slides
    Set { keys: Vec<String> },
    Show,
}

#[derive(Args)]
pub struct GalleryArgs {
    #[command(subcommand)]
    pub action: GalleryAction,
}

#[derive(Subcommand)]
pub enum GalleryAction {
    /// Prepend keys to the gallery
    Add {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Remove keys from the gallery and delete their unreferenced images
    Remove {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    Show,
}

#[derive(Args)]
pub struct ProjectArgs {
    #[command(subcommand)]
    pub action: ProjectAction,
}

#[derive(Subcommand)]
pub enum ProjectAction {
    Add {
        #[arg(long)]
        name: String,
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lng: f64,
        #[arg(long = "image", required = true)]
        images: Vec<String>,
    },
    List,
    Show { id: String },
    /// Change fields of a project; images dropped by the edit are cleaned up
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, allow_negative_numbers = true, requires = "lng")]
        lat: Option<f64>,
        #[arg(long, allow_negative_numbers = true, requires = "lat")]
        lng: Option<f64>,
        #[arg(long = "image")]
        images: Vec<String>,
        /// Leave images dropped by the edit in storage
        #[arg(long)]
        keep_images: bool,
    },
    /// Delete a project and every image only it referenced
    Delete { id: String },
}

#[derive(Args)]
pub struct GcArgs {
    /// Only list the orphans that would be deleted
    #[arg(long)]
    pub dry_run: bool,
}

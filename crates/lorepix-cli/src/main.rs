use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lorepix_contracts::settings::{ExtensionSettings, ImagePosition};
use lorepix_contracts::store::{FileStorage, ImageRecord, ImageSource};
use lorepix_engine::{mime_for_filename, Extension, HttpFetcher, ImageFetcher};

#[derive(Debug, Parser)]
#[command(name = "lorepix", version, about = "Inspect and edit entry image associations")]
struct Cli {
    /// Directory holding the extension's storage blobs.
    #[arg(long, default_value = ".lorepix")]
    store_dir: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List every entry id with its attached images.
    List,
    /// Show all records attached to one entry.
    Show(ShowArgs),
    /// Associate a remote image URL with an entry.
    Set(SetArgs),
    /// Validate, downscale and attach a local image file.
    Attach(AttachArgs),
    /// Remove one image or a whole entry association.
    Remove(RemoveArgs),
    /// Empty the association store.
    Clear(ClearArgs),
    /// Fetch an entry's remote image to verify it loads.
    Check(CheckArgs),
    /// Print or update the extension settings.
    Settings(SettingsArgs),
}

#[derive(Debug, Parser)]
struct ShowArgs {
    #[arg(long)]
    entry: String,
}

#[derive(Debug, Parser)]
struct SetArgs {
    #[arg(long)]
    entry: String,
    #[arg(long)]
    url: String,
}

#[derive(Debug, Parser)]
struct AttachArgs {
    #[arg(long)]
    entry: String,
    #[arg(long)]
    file: PathBuf,
    /// Stored filename; defaults to the file's own name.
    #[arg(long)]
    filename: Option<String>,
}

#[derive(Debug, Parser)]
struct RemoveArgs {
    #[arg(long)]
    entry: String,
    /// Record id of a single gallery image; omit to drop the whole entry.
    #[arg(long)]
    image: Option<String>,
}

#[derive(Debug, Parser)]
struct ClearArgs {
    #[arg(long)]
    yes: bool,
}

#[derive(Debug, Parser)]
struct CheckArgs {
    #[arg(long)]
    entry: String,
}

#[derive(Debug, Parser)]
struct SettingsArgs {
    /// `key=value` updates, e.g. `imagePosition=before` or
    /// `maxImageWidth=1024`. Without any, prints the current settings.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    updates: Vec<String>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("lorepix error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let mut extension = Extension::init(Box::new(FileStorage::new(&cli.store_dir)));
    for warning in extension.warnings() {
        eprintln!("warning: {warning}");
    }

    match cli.command {
        Command::List => {
            if extension.store().is_empty() {
                println!("no associations");
                return Ok(0);
            }
            let ids = extension
                .store()
                .ids()
                .map(str::to_string)
                .collect::<Vec<String>>();
            for id in ids {
                let records = extension.store().get(&id).unwrap_or_default();
                match records {
                    [single] => println!("{id}: {}", describe(single)),
                    many => println!("{id}: {} images", many.len()),
                }
            }
            Ok(0)
        }
        Command::Show(args) => {
            let Some(records) = extension.store().get(&args.entry) else {
                println!("no association for '{}'", args.entry);
                return Ok(1);
            };
            for record in records {
                println!("{}", describe(record));
            }
            Ok(0)
        }
        Command::Set(args) => {
            if args.url.trim().is_empty() {
                bail!("--url must not be empty; use `remove` to clear an association");
            }
            extension
                .set_remote_url(&args.entry, &args.url)
                .map_err(anyhow::Error::new)?;
            println!("{} -> {}", args.entry, args.url.trim());
            Ok(0)
        }
        Command::Attach(args) => {
            let bytes = fs::read(&args.file)
                .with_context(|| format!("reading {}", args.file.display()))?;
            let filename = match args.filename {
                Some(name) => name,
                None => args
                    .file
                    .file_name()
                    .and_then(|value| value.to_str())
                    .map(str::to_string)
                    .unwrap_or_default(),
            };
            let Some(mime) = mime_for_filename(&filename) else {
                bail!("cannot determine an image type for '{filename}'");
            };
            let record = extension
                .attach_upload(&args.entry, &bytes, mime, &filename)
                .map_err(anyhow::Error::new)?;
            println!("{} += {}", args.entry, describe(&record));
            Ok(0)
        }
        Command::Remove(args) => {
            let removed = match args.image {
                Some(image_id) => extension
                    .remove_image(&args.entry, &image_id)
                    .map_err(anyhow::Error::new)?,
                None => extension
                    .remove_entry(&args.entry)
                    .map_err(anyhow::Error::new)?,
            };
            if removed {
                println!("removed");
                Ok(0)
            } else {
                println!("nothing to remove for '{}'", args.entry);
                Ok(1)
            }
        }
        Command::Clear(args) => {
            if !args.yes {
                bail!("refusing to clear the store without --yes");
            }
            extension.clear_associations().map_err(anyhow::Error::new)?;
            println!("store cleared");
            Ok(0)
        }
        Command::Check(args) => {
            let Some(record) = extension.store().first(&args.entry) else {
                println!("no association for '{}'", args.entry);
                return Ok(1);
            };
            match &record.source {
                ImageSource::RemoteUrl(url) => match HttpFetcher::new().fetch(url) {
                    Ok(fetched) => {
                        println!(
                            "{url}: ok ({} bytes, {})",
                            fetched.bytes.len(),
                            fetched.mime_type.as_deref().unwrap_or("unknown type")
                        );
                        Ok(0)
                    }
                    Err(err) => {
                        println!("{err}");
                        Ok(1)
                    }
                },
                ImageSource::InlineBinary {
                    data, mime_type, ..
                } => {
                    println!("inline image: {} bytes, {mime_type}", data.len());
                    Ok(0)
                }
            }
        }
        Command::Settings(args) => {
            if args.updates.is_empty() {
                println!("{}", serde_json::to_string_pretty(extension.settings())?);
                return Ok(0);
            }
            let updates = args
                .updates
                .iter()
                .map(|raw| parse_update(raw))
                .collect::<Result<Vec<SettingUpdate>>>()?;
            extension
                .update_settings(|settings| {
                    for update in &updates {
                        update.apply(settings);
                    }
                })
                .map_err(anyhow::Error::new)?;
            println!("{}", serde_json::to_string_pretty(extension.settings())?);
            Ok(0)
        }
    }
}

fn describe(record: &ImageRecord) -> String {
    match &record.source {
        ImageSource::RemoteUrl(url) => url.clone(),
        ImageSource::InlineBinary {
            data,
            mime_type,
            filename,
        } => {
            let id = record.id.as_deref().unwrap_or("-");
            format!("{filename} ({mime_type}, {} bytes, id {id})", data.len())
        }
    }
}

enum SettingUpdate {
    Enabled(bool),
    ShowPreviews(bool),
    IncludeInPrompt(bool),
    Position(ImagePosition),
    MaxSizeBytes(u64),
    MaxWidth(u32),
    MaxHeight(u32),
    Quality(f32),
}

impl SettingUpdate {
    fn apply(&self, settings: &mut ExtensionSettings) {
        match self {
            Self::Enabled(value) => settings.enabled = *value,
            Self::ShowPreviews(value) => settings.show_previews = *value,
            Self::IncludeInPrompt(value) => settings.include_in_prompt = *value,
            Self::Position(value) => settings.image_position = *value,
            Self::MaxSizeBytes(value) => settings.max_image_size_bytes = *value,
            Self::MaxWidth(value) => settings.max_image_width = *value,
            Self::MaxHeight(value) => settings.max_image_height = *value,
            Self::Quality(value) => settings.image_quality = *value,
        }
    }
}

fn parse_update(raw: &str) -> Result<SettingUpdate> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("expected key=value, got '{raw}'");
    };
    let value = value.trim();
    let update = match key.trim() {
        "enabled" => SettingUpdate::Enabled(parse_bool(value)?),
        "showPreviews" => SettingUpdate::ShowPreviews(parse_bool(value)?),
        "includeInPrompt" => SettingUpdate::IncludeInPrompt(parse_bool(value)?),
        "imagePosition" => match value.to_ascii_lowercase().as_str() {
            "before" => SettingUpdate::Position(ImagePosition::Before),
            "after" => SettingUpdate::Position(ImagePosition::After),
            other => bail!("imagePosition must be 'before' or 'after', got '{other}'"),
        },
        "maxImageSizeBytes" => SettingUpdate::MaxSizeBytes(
            value
                .parse()
                .with_context(|| format!("maxImageSizeBytes '{value}'"))?,
        ),
        "maxImageWidth" => SettingUpdate::MaxWidth(
            value
                .parse()
                .with_context(|| format!("maxImageWidth '{value}'"))?,
        ),
        "maxImageHeight" => SettingUpdate::MaxHeight(
            value
                .parse()
                .with_context(|| format!("maxImageHeight '{value}'"))?,
        ),
        "imageQuality" => SettingUpdate::Quality(
            value
                .parse()
                .with_context(|| format!("imageQuality '{value}'"))?,
        ),
        other => bail!("unknown setting '{other}'"),
    };
    Ok(update)
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got '{other}'"),
    }
}

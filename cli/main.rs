use catalog::prelude::*;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "catalog")]
#[command(about = "Manage the product catalog from the command line", long_about = None)]
pub struct Cli {
    #[arg(long, global = true, help = "Database URL (overrides DATABASE_URL)")]
    pub database_url: Option<String>,

    #[arg(long, global = true, help = "Blob storage root (overrides STORAGE_ROOT)")]
    pub storage_root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List all products, newest first.
    List,

    /// Show a single product.
    Show { id: i64 },

    /// Create a product.
    Create {
        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(short, long)]
        price: Option<f64>,

        #[arg(short, long, help = "Image file path, URL or data URL")]
        image: Option<String>,
    },

    /// Delete a product and its stored image.
    Delete { id: i64 },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::from_env()?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }
    if let Some(root) = cli.storage_root {
        config.storage_root = root;
    }

    let db = Database::with_migration(connect(&config.database_url).await?).await?;
    let storage = LocalStorage::new(config.storage_root.clone());
    let policy = ImagePolicy::from(&config);

    match cli.command {
        Commands::List => {
            for product in list_products(&db).await? {
                print_product(&product);
            }
        }
        Commands::Show { id } => {
            print_product(&find_product(&db, id).await?);
        }
        Commands::Create {
            name,
            description,
            price,
            image,
        } => {
            let mut cmd = CreateProductCommand::new(name).with_policy(policy);
            if let Some(description) = description {
                cmd = cmd.with_description(description);
            }
            if let Some(price) = price {
                cmd = cmd.with_price(price);
            }
            if let Some(image) = image {
                cmd = cmd.with_image(read_image(&image).await?);
            }

            let product = cmd.execute(&storage, &db).await?;

            println!("✅ Created product:");
            print_product(&product);
        }
        Commands::Delete { id } => {
            let product = remove_product(&storage, &db, id).await?;

            println!("🗑️ Deleted product {} ({})", product.id, product.name);
        }
    }

    Ok(())
}

/// An existing file is read as an upload; anything else is passed on as text.
async fn read_image(value: &str) -> Result<ImageInput, std::io::Error> {
    let path = Path::new(value);
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(ImageInput::text(value));
    }

    let bytes = tokio::fs::read(path).await?;

    Ok(ImageInput::Upload(UploadedFile {
        bytes,
        content_type: None,
        file_name: path.file_name().map(|n| n.to_string_lossy().to_string()),
    }))
}

fn print_product(product: &Product) {
    println!(
        "{}\t{}\t{}\t{}",
        product.id,
        product.name,
        product
            .price
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string()),
        product.image.as_deref().unwrap_or("-"),
    );
}

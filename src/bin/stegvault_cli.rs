//! stegvault CLI: offline capacity checks, key image inspection, local
//! decryption of a downloaded ciphertext, and raw embed/extract.
//! Build with: cargo build --release --bin stegvault-cli

use base64::Engine;
use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use stegvault_lib::envelope::KeyEnvelope;
use stegvault_lib::{stego, stego_crypto};

#[derive(Parser, Debug)]
#[command(name = "stegvault-cli", version, about = "Offline tools for stegvault key images")]
struct Cli {
    /// Refuse images wider or taller than this many pixels
    #[arg(long, global = true, default_value_t = 4096)]
    max_dimension: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print how many payload bytes an image can hold
    Capacity {
        image: PathBuf,
    },
    /// Show the file id, content type and name a key image refers to
    Inspect {
        key_image: PathBuf,
    },
    /// Decrypt a ciphertext downloaded from /file/{id} with its key image
    Decrypt {
        ciphertext: PathBuf,
        key_image: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Hide a payload in a cover image and write the result as PNG
    Embed {
        cover: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Payload as UTF-8 string, or @path to read it from a file
        #[arg(long)]
        payload: String,
    },
    /// Write the raw hidden payload to stdout
    Extract {
        image: PathBuf,
        /// Print the payload base64-encoded instead of raw bytes
        #[arg(long)]
        base64: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let max = cli.max_dimension;
    let (name, result) = match cli.command {
        Command::Capacity { image } => ("capacity", run_capacity(&image, max)),
        Command::Inspect { key_image } => ("inspect", run_inspect(&key_image, max)),
        Command::Decrypt {
            ciphertext,
            key_image,
            output,
        } => ("decrypt", run_decrypt(&ciphertext, &key_image, &output, max)),
        Command::Embed {
            cover,
            output,
            payload,
        } => ("embed", run_embed(&cover, &output, &payload, max)),
        Command::Extract { image, base64 } => ("extract", run_extract(&image, base64, max)),
    };
    if let Err(e) = result {
        eprintln!("{} error: {}", name, e);
        std::process::exit(1);
    }
}

fn read(path: &Path) -> Result<Vec<u8>, String> {
    fs::read(path).map_err(|e| format!("{}: {}", path.display(), e))
}

fn read_envelope(key_image: &Path, max_side: u32) -> Result<KeyEnvelope, String> {
    let bytes = read(key_image)?;
    let payload = stego::extract(&bytes, max_side).map_err(|e| e.to_string())?;
    KeyEnvelope::from_bytes(&payload).map_err(|e| e.to_string())
}

fn run_capacity(image: &Path, max_side: u32) -> Result<(), String> {
    let img = stego::decode_carrier(&read(image)?, max_side).map_err(|e| e.to_string())?;
    let (width, height) = (img.width(), img.height());
    println!(
        "{}x{}: {} bits, {} payload bytes",
        width,
        height,
        stego::capacity_bits(width, height),
        stego::capacity_bytes(width, height)
    );
    Ok(())
}

fn run_inspect(key_image: &Path, max_side: u32) -> Result<(), String> {
    let envelope = read_envelope(key_image, max_side)?;
    let summary = serde_json::json!({
        "fileId": envelope.file_id,
        "contentType": envelope.content_type,
        "originalName": envelope.original_name,
    });
    let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(())
}

fn run_decrypt(
    ciphertext: &Path,
    key_image: &Path,
    output: &Path,
    max_side: u32,
) -> Result<(), String> {
    let envelope = read_envelope(key_image, max_side)?;
    let sealed = read(ciphertext)?;
    let (body, tag) = stego_crypto::split_sealed(&sealed).map_err(|e| e.to_string())?;
    let aad = stego_crypto::associated_data(
        envelope.file_id.as_str(),
        envelope.content_type.as_deref(),
    )
    .map_err(|e| e.to_string())?;
    let plaintext =
        stego_crypto::decrypt(body, &tag, &envelope.material, &aad).map_err(|e| e.to_string())?;
    fs::write(output, &plaintext).map_err(|e| e.to_string())?;
    eprintln!("Wrote {} ({} bytes)", output.display(), plaintext.len());
    Ok(())
}

fn run_embed(cover: &Path, output: &Path, payload: &str, max_side: u32) -> Result<(), String> {
    let payload_bytes = match payload.strip_prefix('@') {
        Some(path) => read(Path::new(path))?,
        None => payload.as_bytes().to_vec(),
    };
    let carrier = stego::decode_carrier(&read(cover)?, max_side)
        .map_err(|e| e.to_string())?
        .to_rgba8();
    let png_bytes = stego::embed(&carrier, &payload_bytes).map_err(|e| e.to_string())?;
    fs::write(output, png_bytes).map_err(|e| e.to_string())?;
    eprintln!("Wrote {}", output.display());
    Ok(())
}

fn run_extract(image: &Path, as_base64: bool, max_side: u32) -> Result<(), String> {
    let payload = stego::extract(&read(image)?, max_side).map_err(|e| e.to_string())?;
    let mut stdout = io::stdout();
    if as_base64 {
        let encoded = base64::engine::general_purpose::STANDARD.encode(payload.as_slice());
        writeln!(stdout, "{}", encoded).map_err(|e| e.to_string())?;
    } else {
        stdout.write_all(&payload).map_err(|e| e.to_string())?;
    }
    Ok(())
}

#![doc = include_str!("../README.md")]

use anyhow::Context;
use cacher_core::proto::{CacheData, Nothing, cacher_client::CacherClient};
use clap::{Parser, ValueEnum};
use std::time::Instant;
use tokio_stream::StreamExt;
use tonic::codec::CompressionEncoding;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    None,
    Zstd,
    Gzip,
    Deflate,
}

impl Compression {
    const fn encoding(self) -> Option<CompressionEncoding> {
        match self {
            Self::None => None,
            Self::Zstd => Some(CompressionEncoding::Zstd),
            Self::Gzip => Some(CompressionEncoding::Gzip),
            Self::Deflate => Some(CompressionEncoding::Deflate),
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "cacher-consumer",
    version,
    about = "Opens one cacher stream and prints what arrives"
)]
struct Args {
    /// Server endpoint.
    ///
    /// Environment variable: `CACHER_ADDR`
    #[arg(long, env = "CACHER_ADDR", default_value_t = String::from("http://127.0.0.1:50051"))]
    server_addr: String,

    /// Characters of content printed per item.
    #[arg(long, default_value_t = 360)]
    max_len: usize,

    /// Compression requested for the stream.
    #[arg(long, value_enum, default_value_t = Compression::None)]
    compression: Compression,
}

/// Renders at most `max_len` characters of `content` with surrounding
/// whitespace trimmed, marking a cut with `...`.
fn cut_content(content: &[u8], max_len: usize) -> String {
    let decoded = String::from_utf8_lossy(content);
    let text = decoded.trim();
    match text.char_indices().nth(max_len) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_owned(),
    }
}

fn print_item(item: &CacheData, max_len: usize) {
    println!("== {} ({} bytes)", item.resource_id, item.content.len());
    println!("{}", cut_content(&item.content, max_len));
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let mut client = CacherClient::connect(args.server_addr.clone())
        .await
        .with_context(|| format!("failed to connect to {}", args.server_addr))?;
    if let Some(encoding) = args.compression.encoding() {
        client = client
            .send_compressed(encoding)
            .accept_compressed(encoding);
    }

    let start = Instant::now();
    let mut stream = client.get_random_data_stream(Nothing {}).await?.into_inner();

    let mut received = 0usize;
    while let Some(item) = stream.next().await {
        let item = item.context("stream ended with an error")?;
        print_item(&item, args.max_len);
        received += 1;
    }

    println!(
        "\nReceived {received} items in {:.2} ms",
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_content_is_printed_whole() {
        assert_eq!(cut_content(b"hello", 360), "hello");
        assert_eq!(cut_content(b"hello", 5), "hello");
    }

    #[test]
    fn long_content_is_cut_and_marked() {
        assert_eq!(cut_content(b"hello world", 5), "hello...");
        assert_eq!(cut_content(b"abc", 0), "...");
    }

    #[test]
    fn surrounding_whitespace_is_trimmed_before_cutting() {
        assert_eq!(cut_content(b"\n\t  hello  \r\n", 360), "hello");
        assert_eq!(cut_content(b"   <html>body</html>", 6), "<html>...");
        assert_eq!(cut_content(b" \n ", 360), "");
    }

    #[test]
    fn cuts_on_character_boundaries() {
        let content = "héllo wörld".as_bytes();
        assert_eq!(cut_content(content, 2), "hé...");
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        assert_eq!(cut_content(&[b'a', 0xFF, b'b'], 360), "a\u{FFFD}b");
    }

    #[test]
    fn compression_maps_to_encodings() {
        assert_eq!(Compression::None.encoding(), None);
        assert_eq!(
            Compression::Zstd.encoding(),
            Some(CompressionEncoding::Zstd)
        );
    }
}

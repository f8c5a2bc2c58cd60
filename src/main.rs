use pdf_graph::core::chunked_stream::{ChunkedStream, FileRangeLoader};
use pdf_graph::{Document, DocumentOptions, OutlineItem};
use std::env;
use std::fs;
use std::process;

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("usage: pdf-graph [--chunked] <file.pdf>");
        process::exit(2);
    }

    let chunked = args.iter().any(|a| a == "--chunked");
    let path = args
        .iter()
        .skip(1)
        .find(|a| !a.starts_with("--"))
        .cloned()
        .unwrap_or_default();

    let result = if chunked {
        FileRangeLoader::open(&path).and_then(|loader| {
            Document::open_with(
                Box::new(ChunkedStream::new(Box::new(loader), None)),
                DocumentOptions::default(),
            )
        })
    } else {
        fs::read(&path)
            .map_err(|e| pdf_graph::PdfError::Io(e.to_string()))
            .and_then(Document::open)
    };

    let mut doc = match result {
        Ok(doc) => doc,
        Err(e) => {
            eprintln!("{}: {}", path, e);
            process::exit(1);
        }
    };

    match doc.num_pages() {
        Ok(n) => println!("pages: {}", n),
        Err(e) => println!("pages: unavailable ({})", e),
    }

    if let Ok(Some(labels)) = doc.catalog().page_labels() {
        println!("page labels: {}", labels.join(", "));
    }

    match doc.catalog().page_mode() {
        Ok(mode) => println!("page mode: {}", mode),
        Err(e) => println!("page mode: unavailable ({})", e),
    }

    if let Ok(dests) = doc.catalog().destinations() {
        if !dests.is_empty() {
            println!("named destinations: {}", dests.len());
        }
    }

    if let Ok(Some(attachments)) = doc.catalog().attachments() {
        for (name, attachment) in &attachments {
            let size = attachment.content.as_ref().map_or(0, Vec::len);
            println!("attachment: {} ({} bytes)", name, size);
        }
    }

    match doc.catalog().document_outline() {
        Ok(Some(outline)) => {
            println!("outline:");
            print_outline(&outline, 1);
        }
        Ok(None) => println!("outline: none"),
        Err(e) => println!("outline: unavailable ({})", e),
    }
}

fn print_outline(items: &[OutlineItem], depth: usize) {
    for item in items {
        println!("{}{}", "  ".repeat(depth), item.title);
        print_outline(&item.items, depth + 1);
    }
}

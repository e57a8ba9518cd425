//! Kemet - command-line front end for the book lending client
//!
//! Reads configuration from the environment (and `.env`), then runs one
//! command against the lending GraphQL API.

mod cli;

use anyhow::{Context, Result};

use kemet_client::config::Config;
use kemet_client::forms::{FormField, SignupField, SubmitResult};
use kemet_client::services::{BookFilter, LendingService, init_tracing};

use crate::cli::{Command, USAGE};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    init_tracing(config.log_format)?;

    tracing::info!(endpoint = %config.graphql_api_url, "Starting Kemet client");

    let service = LendingService::from_config(&config).context("Failed to build GraphQL client")?;

    match Command::from_args() {
        Command::Books {
            search,
            type_code,
            pages,
            page_size,
        } => list_books(&service, BookFilter { search_string: search, type_code }, pages, page_size).await,
        Command::Checkouts => list_checkouts(&service).await,
        Command::Signup {
            name,
            email,
            password,
            confirm_password,
        } => signup(&service, [name, email, password, confirm_password]).await,
        Command::SignOut => {
            service.sign_out().await.context("Failed to clear stored token")?;
            println!("Signed out");
            Ok(())
        }
        Command::Status => {
            let signed_in = service.session().has_token().await;
            println!("{}", if signed_in { "Signed in" } else { "Anonymous" });
            Ok(())
        }
        Command::Help => {
            println!("{USAGE}");
            Ok(())
        }
    }
}

async fn list_books(service: &LendingService, filter: BookFilter, pages: usize, page_size: usize) -> Result<()> {
    let catalog = service.available_books(&filter, page_size)?;
    let mut books = catalog.books().await.map_err(|e| anyhow::anyhow!("{e}"))?;
    for _ in 1..pages {
        let before = books.len();
        books = catalog.load_more().await.map_err(|e| anyhow::anyhow!("{e}"))?;
        if books.len() == before {
            break;
        }
    }

    for book in &books {
        println!(
            "{:>6}  {:<40}  {}",
            book.id,
            book.title.as_deref().unwrap_or("(untitled)"),
            book.price.map(|p| format!("{p:.2} ETB")).unwrap_or_default()
        );
    }
    tracing::info!(count = books.len(), "Listed books");
    Ok(())
}

async fn list_checkouts(service: &LendingService) -> Result<()> {
    let checkouts = service
        .user_checkouts()
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    if checkouts.is_empty() {
        println!("You don't have checkouts yet. Pick a book and place an order first.");
        return Ok(());
    }

    for checkout in &checkouts {
        let title = checkout
            .book()
            .and_then(|b| b.title.as_deref())
            .unwrap_or("(unknown book)");
        let status: String = checkout.status.clone().into();
        let due = match (checkout.is_open(), checkout.return_date()) {
            (true, Some(date)) => format!("return by {}", date.format("%b %e, %Y")),
            _ => String::new(),
        };
        println!("{:>6}  {:<40}  {:<8}  {}", checkout.id, title, status, due);
    }
    Ok(())
}

async fn signup(service: &LendingService, values: [String; 4]) -> Result<()> {
    let form = service.signup_form();
    for (field, value) in SignupField::ALL.iter().zip(values) {
        form.edit(*field, value);
    }

    match form.submit().await {
        SubmitResult::Succeeded(user) => {
            println!("Welcome, {} <{}>", user.name, user.email);
            Ok(())
        }
        SubmitResult::Ignored => anyhow::bail!("A signup is already in progress"),
        SubmitResult::Invalid | SubmitResult::Rejected | SubmitResult::Failed => {
            let snapshot = form.snapshot();
            for (field, message) in snapshot.errors().fields() {
                eprintln!("{}: {}", field.name(), message);
            }
            if let Some(message) = snapshot.errors().form_error() {
                eprintln!("{message}");
            }
            anyhow::bail!("Signup failed")
        }
    }
}

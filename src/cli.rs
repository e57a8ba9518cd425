//! Minimal CLI parsing for the `kemet` binary.

use std::env;

use kemet_client::services::DEFAULT_PAGE_SIZE;

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Books {
        search: String,
        type_code: Option<String>,
        pages: usize,
        page_size: usize,
    },
    Checkouts,
    Signup {
        name: String,
        email: String,
        password: String,
        confirm_password: String,
    },
    SignOut,
    Status,
    Help,
}

pub const USAGE: &str = "\
usage: kemet <command> [options]

commands:
  books [--search TEXT] [--type CODE] [--pages N] [--page-size N]
  checkouts
  signup --name NAME --email EMAIL --password PASSWORD [--confirm PASSWORD]
  signout
  status";

impl Command {
    pub fn from_args() -> Self {
        Self::parse(env::args().skip(1))
    }

    pub fn parse(args: impl IntoIterator<Item = String>) -> Self {
        let mut args = args.into_iter();
        let Some(command) = args.next() else {
            return Command::Help;
        };
        let options = Options::parse(args);

        match command.as_str() {
            "books" => Command::Books {
                search: options.get("search").unwrap_or_default(),
                type_code: options.get("type"),
                pages: options.number("pages").unwrap_or(1).max(1),
                page_size: options.number("page-size").unwrap_or(DEFAULT_PAGE_SIZE).max(1),
            },
            "checkouts" => Command::Checkouts,
            "signup" => {
                let password = options.get("password").unwrap_or_default();
                Command::Signup {
                    name: options.get("name").unwrap_or_default(),
                    email: options.get("email").unwrap_or_default(),
                    confirm_password: options.get("confirm").unwrap_or_else(|| password.clone()),
                    password,
                }
            }
            "signout" => Command::SignOut,
            "status" => Command::Status,
            _ => Command::Help,
        }
    }
}

/// `--key value` and `--key=value` pairs
struct Options(Vec<(String, String)>);

impl Options {
    fn parse(args: impl Iterator<Item = String>) -> Self {
        let mut pairs = Vec::new();
        let mut args = args.peekable();
        while let Some(arg) = args.next() {
            let Some(key) = arg.strip_prefix("--") else {
                continue;
            };
            if let Some((key, value)) = key.split_once('=') {
                pairs.push((key.to_string(), value.to_string()));
            } else if let Some(value) = args.next_if(|next| !next.starts_with("--")) {
                pairs.push((key.to_string(), value));
            } else {
                pairs.push((key.to_string(), String::new()));
            }
        }
        Self(pairs)
    }

    fn get(&self, key: &str) -> Option<String> {
        self.0
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    fn number(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.parse().ok())
    }
}

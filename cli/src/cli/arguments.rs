use crate::ipc;
use anyhow::{Result, anyhow};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{info, warn};
use moonproxy::config::settings::DEFAULT_SETTINGS_PATH;
use moonproxy::config::watcher::watch_moon_file;
use moonproxy::config::{JsonFileRepository, ProxyGroup, ProxyNode, Rule, Settings};
use moonproxy::engine::YamlFileEngine;
use moonproxy::utils::validation::is_empty_or_whitespace;
use moonproxy::{ConfigStore, RuleDialect};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug, Clone)]
#[command(name = "moonproxy", about, author, version, long_about = None, propagate_version = true)]
pub struct MoonproxyArguments {
    #[arg(short = 'c', long = "config", help = "Path to the settings file (overrides running instance)")]
    pub(crate) settings_path: Option<String>,
    #[arg(short = 'v', long = "verbose", help = "Enable verbose logging")]
    pub(crate) verbose: bool,
    #[command(subcommand)]
    pub(crate) command: Option<MoonproxyCommands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum MoonproxyCommands {
    #[clap(name = "proxies", about = "Manage proxy nodes")]
    Proxies {
        #[clap(subcommand)]
        command: ProxyCommands,
    },
    #[clap(name = "groups", about = "Manage proxy groups")]
    Groups {
        #[clap(subcommand)]
        command: GroupCommands,
    },
    #[clap(name = "rules", about = "Manage routing rules")]
    Rules {
        #[clap(subcommand)]
        command: RuleCommands,
    },
    #[clap(name = "render", about = "Print the engine configuration")]
    Render,
    #[clap(name = "config", about = "Manage the settings file")]
    Config {
        #[clap(subcommand)]
        command: ConfigCommands,
    },
    #[clap(name = "watch", about = "Keep the engine config in sync with the Moon file (default)")]
    Watch,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ProxyCommands {
    #[clap(name = "list", about = "List all proxy nodes")]
    List,
    #[clap(name = "add", about = "Add or update a proxy node")]
    Add {
        #[clap(flatten)]
        node: NodeOptions,
    },
    #[clap(name = "remove", about = "Remove a proxy node")]
    Remove { uid: String },
    #[clap(name = "select", about = "Select the active proxy, or clear the selection when no uid is given")]
    Select { uid: Option<String> },
}

#[derive(Subcommand, Debug, Clone)]
pub enum GroupCommands {
    #[clap(name = "list", about = "List all proxy groups")]
    List,
    #[clap(name = "add", about = "Add or update a proxy group")]
    Add {
        uid: String,
        name: String,
        /// Subscription url; omit for a local group
        #[arg(long = "url")]
        url: Option<String>,
        #[arg(long = "remark")]
        remark: Option<String>,
    },
    #[clap(name = "remove", about = "Remove a proxy group and its nodes")]
    Remove { uid: String },
}

#[derive(Subcommand, Debug, Clone)]
pub enum RuleCommands {
    #[clap(name = "list", about = "List all rules in engine order")]
    List,
    #[clap(name = "add", about = "Add or update a rule")]
    Add {
        /// Process name, path, pid or pattern; MATCH for the catch-all rule
        process: String,
        /// Proxy uid, group uid or engine policy (e.g. DIRECT)
        action: String,
        /// Uid of an existing rule to update
        #[arg(long = "uid")]
        uid: Option<String>,
    },
    #[clap(name = "remove", about = "Remove a rule")]
    Remove { uid: String },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    #[clap(name = "show", about = "Show the current settings")]
    Show,
    #[clap(name = "show-path", about = "Show the path to the settings file")]
    ShowPath,
    #[clap(name = "dialect", about = "Set the rule type tokens written for the engine")]
    Dialect { dialect: DialectArg },
}

#[derive(Args, Debug, Clone)]
pub struct NodeOptions {
    /// Proxy server host
    host: String,
    /// Proxy server port
    port: u16,
    #[arg(short = 's', long = "scheme", default_value = "socks5", help = "Proxy protocol (socks5, http, ...)")]
    scheme: String,
    #[arg(short = 'g', long = "group", default_value = "0", help = "Owning group uid")]
    group: String,
    #[arg(short = 'u', long = "username")]
    username: Option<String>,
    #[arg(short = 'p', long = "password")]
    password: Option<String>,
    /// Uid of an existing node to update
    #[arg(long = "uid")]
    uid: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum DialectArg {
    Descriptive,
    Clash,
}

impl From<DialectArg> for RuleDialect {
    fn from(d: DialectArg) -> Self {
        match d {
            DialectArg::Descriptive => RuleDialect::Descriptive,
            DialectArg::Clash => RuleDialect::Clash,
        }
    }
}

impl From<NodeOptions> for ProxyNode {
    fn from(o: NodeOptions) -> Self {
        let mut node = ProxyNode::new(o.group, o.scheme, o.host, o.port);
        if let Some(uid) = o.uid {
            node.uid = uid;
        }
        node.username = o.username;
        node.password = o.password;
        node
    }
}

/// Settings path from the argument, a running instance, or the default.
async fn resolve_settings_path(arg: Option<String>) -> PathBuf {
    if let Some(s) = arg.filter(|s| !is_empty_or_whitespace(s)) {
        return PathBuf::from(s);
    }
    if let Some(path) = ipc::get_running_settings_path().await {
        return path;
    }
    PathBuf::from(DEFAULT_SETTINGS_PATH)
}

async fn open_store(settings: &Settings) -> Result<ConfigStore> {
    let repository = Arc::new(JsonFileRepository::new(settings.moon_path()));
    let engine = Arc::new(YamlFileEngine::new(settings.engine_path()));
    Ok(ConfigStore::open(repository, engine, settings.store_options()).await?)
}

async fn serve(settings: Settings) -> Result<()> {
    info!("Starting moonproxy");
    let store = Arc::new(open_store(&settings).await?);
    store.push_engine().await?;
    let _watcher = watch_moon_file(Arc::clone(&store), settings.moon_path())?;
    let _ipc = match ipc::serve_settings_path(settings.get_path()) {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Settings path not served over IPC (another instance running?): {}", e);
            None
        }
    };
    info!("Syncing {} -> {}", settings.moon_path().display(), settings.engine_path().display());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}

fn print_node(node: &ProxyNode, selected: bool) {
    println!(
        "{} \x1b[1;36m{}\x1b[0m: \x1b[1;33m{}\x1b[0m://\x1b[1;32m{}:{}\x1b[0m{}",
        if selected { "*" } else { " " },
        node.uid,
        node.scheme,
        node.host,
        node.port,
        node.username.as_deref().map(|u| format!(" (user {})", u)).unwrap_or_default()
    );
}

impl MoonproxyArguments {
    pub async fn handle_arguments(&self) -> Result<()> {
        let effective_settings_path = resolve_settings_path(self.settings_path.clone()).await;
        let mut settings = Settings::try_load(&effective_settings_path).await?;

        let Some(command) = &self.command else {
            return serve(settings).await;
        };
        match command {
            MoonproxyCommands::Watch => return serve(settings).await,
            // ---
            // Config subcommand
            // ---
            MoonproxyCommands::Config { command } => match command {
                ConfigCommands::Show => println!("{}", settings),
                ConfigCommands::ShowPath => println!("{}", settings.get_path().display()),
                ConfigCommands::Dialect { dialect } => {
                    settings.set_rule_dialect((*dialect).into());
                    settings.save().await?;
                    let store = open_store(&settings).await?;
                    store.push_engine().await?;
                    info!("Rule dialect set to {:?}", dialect);
                }
            },
            // ---
            // Proxies subcommand
            // ---
            MoonproxyCommands::Proxies { command } => {
                let store = open_store(&settings).await?;
                match command {
                    ProxyCommands::List => {
                        let snapshot = store.snapshot().await;
                        let current = snapshot.config.current_proxy_id.as_deref();
                        for group in &snapshot.config.proxy_group_list {
                            println!("\x1b[1;35m{}\x1b[0m [{}]", group.label(), group.uid);
                            for node in &group.proxy_list {
                                print_node(node, current == Some(node.uid.as_str()));
                            }
                        }
                    }
                    ProxyCommands::Add { node } => {
                        let node: ProxyNode = node.clone().into();
                        let uid = node.uid.clone();
                        store.save_proxy(node).await?;
                        info!("Saved proxy: {}", uid);
                    }
                    ProxyCommands::Remove { uid } => {
                        let snapshot = store.snapshot().await;
                        let node = snapshot.config.find_proxy(uid).cloned().ok_or_else(|| anyhow!("Proxy not found: {}", uid))?;
                        store.delete_proxy(&node).await?;
                        info!("Removed proxy: {}", uid);
                    }
                    ProxyCommands::Select { uid } => {
                        store.select_proxy(uid.as_deref()).await?;
                        match uid {
                            Some(uid) => info!("Selected proxy: {}", uid),
                            None => info!("Cleared proxy selection"),
                        }
                    }
                }
            }
            // ---
            // Groups subcommand
            // ---
            MoonproxyCommands::Groups { command } => {
                let store = open_store(&settings).await?;
                match command {
                    GroupCommands::List => {
                        for group in &store.snapshot().await.config.proxy_group_list {
                            println!(
                                "\x1b[1;36m{}\x1b[0m: \x1b[1;33m{}\x1b[0m ({} nodes){}",
                                group.uid,
                                group.label(),
                                group.proxy_list.len(),
                                group.subscription_url().map(|u| format!(" <- \x1b[1;32m{}\x1b[0m", u)).unwrap_or_default()
                            );
                        }
                    }
                    GroupCommands::Add { uid, name, url, remark } => {
                        let existing = store.snapshot().await.config.find_group(uid).map(|g| g.proxy_list.clone()).unwrap_or_default();
                        let mut group = match url {
                            Some(url) => ProxyGroup::subscription(uid.clone(), name.clone(), url.clone()),
                            None => ProxyGroup::local(uid.clone(), name.clone(), Vec::new()),
                        };
                        group.remark = remark.clone();
                        group.proxy_list = existing;
                        if store.save_proxy_group(group).await? {
                            info!("Saved group: {}", uid);
                        } else {
                            warn!("Group {} is being edited elsewhere, try again", uid);
                        }
                    }
                    GroupCommands::Remove { uid } => {
                        let snapshot = store.snapshot().await;
                        let group = snapshot.config.find_group(uid).cloned().ok_or_else(|| anyhow!("Group not found: {}", uid))?;
                        store.delete_proxy_group(&group).await?;
                        info!("Removed group: {}", uid);
                    }
                }
            }
            // ---
            // Rules subcommand
            // ---
            MoonproxyCommands::Rules { command } => {
                let store = open_store(&settings).await?;
                match command {
                    RuleCommands::List => {
                        let snapshot = store.snapshot().await;
                        let rendered = store.translated().await.rules;
                        let (catch_all, normal): (Vec<&Rule>, Vec<&Rule>) = snapshot.config.rule_list.iter().partition(|r| r.is_catch_all());
                        for (rule, line) in normal.into_iter().chain(catch_all).zip(rendered) {
                            println!("\x1b[1;36m{}\x1b[0m: \x1b[1;32m{}\x1b[0m", rule.uid, line);
                        }
                    }
                    RuleCommands::Add { process, action, uid } => {
                        let mut rule = Rule::new(process.clone(), action.clone());
                        if let Some(uid) = uid {
                            rule.uid = uid.clone();
                        }
                        let uid = rule.uid.clone();
                        store.save_rule(rule).await?;
                        info!("Saved rule: {}", uid);
                    }
                    RuleCommands::Remove { uid } => {
                        let snapshot = store.snapshot().await;
                        let rule = snapshot.config.find_rule(uid).cloned().ok_or_else(|| anyhow!("Rule not found: {}", uid))?;
                        store.delete_rule(&rule).await?;
                        info!("Removed rule: {}", uid);
                    }
                }
            }
            MoonproxyCommands::Render => {
                let store = open_store(&settings).await?;
                print!("{}", serde_yaml::to_string(&store.translated().await)?);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proxy_add() {
        let args = MoonproxyArguments::parse_from(["moonproxy", "proxies", "add", "10.0.0.1", "1080", "-s", "http", "-u", "me", "-p", "pw"]);
        let Some(MoonproxyCommands::Proxies { command: ProxyCommands::Add { node } }) = args.command else {
            panic!("expected proxies add");
        };
        let node: ProxyNode = node.into();
        assert_eq!(node.host, "10.0.0.1");
        assert_eq!(node.port, 1080);
        assert_eq!(node.scheme, "http");
        assert_eq!(node.group_uid, "0");
        assert_eq!(node.username.as_deref(), Some("me"));
        assert!(!node.uid.is_empty());
    }

    #[test]
    fn test_parse_dialect() {
        let args = MoonproxyArguments::parse_from(["moonproxy", "-c", "/tmp/s.json", "config", "dialect", "clash"]);
        assert_eq!(args.settings_path.as_deref(), Some("/tmp/s.json"));
        let Some(MoonproxyCommands::Config { command: ConfigCommands::Dialect { dialect } }) = args.command else {
            panic!("expected config dialect");
        };
        assert_eq!(RuleDialect::from(dialect), RuleDialect::Clash);
    }

    #[test]
    fn test_no_command_defaults_to_watch() {
        let args = MoonproxyArguments::parse_from(["moonproxy", "-v"]);
        assert!(args.verbose);
        assert!(args.command.is_none());
    }
}

//! iproute2 network strategy

use std::sync::Arc;

use async_trait::async_trait;
use hostctl_exec::{RemoteExecutor, shell};
use tracing::{info, instrument};

use crate::capability::StrategyKind;
use crate::error::ResourceError;
use crate::runner::Runner;
use crate::traits::NetworkManager;

/// Network queries through `ip` and `hostname`
#[derive(Debug, Clone)]
pub struct Iproute2 {
    runner: Runner,
}

impl Iproute2 {
    pub fn new(executor: Arc<dyn RemoteExecutor>, use_sudo: bool) -> Self {
        Self {
            runner: Runner::new(executor, use_sudo),
        }
    }

    /// `2: eth0@if7: <BROADCAST,...` lines of `ip -o link show`
    fn parse_links(output: &str) -> Vec<String> {
        output
            .lines()
            .filter_map(|line| line.split(": ").nth(1))
            .map(|name| name.split('@').next().unwrap_or(name).trim().to_string())
            .filter(|name| !name.is_empty())
            .collect()
    }

    /// Address tokens following `inet`/`inet6` in `ip -o addr show`
    fn parse_addresses(output: &str) -> Vec<String> {
        let mut addresses = Vec::new();
        for line in output.lines() {
            let mut words = line.split_whitespace();
            while let Some(word) = words.next() {
                if (word == "inet" || word == "inet6")
                    && let Some(addr) = words.next()
                {
                    addresses.push(addr.to_string());
                }
            }
        }
        addresses
    }

    /// `default via 10.0.0.1 dev eth0 ...`
    fn parse_gateway(output: &str) -> Option<String> {
        output.lines().find_map(|line| {
            let mut words = line.split_whitespace();
            while let Some(word) = words.next() {
                if word == "via" {
                    return words.next().map(String::from);
                }
            }
            None
        })
    }
}

#[async_trait]
impl NetworkManager for Iproute2 {
    async fn hostname(&self) -> Result<String, ResourceError> {
        let result = self.runner.check(self.runner.argv(["hostname"])).await?;
        Ok(result.stdout.trim().to_string())
    }

    #[instrument(skip(self))]
    async fn set_hostname(&self, name: &str) -> Result<(), ResourceError> {
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(ResourceError::InvalidArgument(format!(
                "invalid hostname {name:?}"
            )));
        }
        let quoted = shell::quote(name);
        let script = format!("hostname {quoted} && echo {quoted} > /etc/hostname");
        self.runner.check(self.runner.script(script)).await?;
        info!(hostname = name, "hostname changed");
        Ok(())
    }

    async fn interfaces(&self) -> Result<Vec<String>, ResourceError> {
        let result = self
            .runner
            .check(self.runner.argv(["ip", "-o", "link", "show"]))
            .await?;
        Ok(Self::parse_links(&result.stdout))
    }

    async fn addresses(&self, interface: &str) -> Result<Vec<String>, ResourceError> {
        let result = self
            .runner
            .check(self.runner.argv(["ip", "-o", "addr", "show", "dev", interface]))
            .await?;
        Ok(Self::parse_addresses(&result.stdout))
    }

    async fn default_gateway(&self) -> Result<Option<String>, ResourceError> {
        let result = self
            .runner
            .check(self.runner.argv(["ip", "route", "show", "default"]))
            .await?;
        Ok(Self::parse_gateway(&result.stdout))
    }

    fn strategy(&self) -> StrategyKind {
        StrategyKind::Iproute2
    }
}

#[cfg(test)]
mod tests {
    use hostctl_exec::testing::FakeRemote;

    use super::*;

    const LINKS: &str = "1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 qdisc noqueue state UNKNOWN\\    link/loopback 00:00:00:00:00:00 brd 00:00:00:00:00:00
2: eth0@if7: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc noqueue state UP\\    link/ether 02:42:ac:11:00:02 brd ff:ff:ff:ff:ff:ff
";

    const ADDRS: &str = "2: eth0    inet 172.17.0.2/16 brd 172.17.255.255 scope global eth0\\       valid_lft forever preferred_lft forever
2: eth0    inet6 fe80::42:acff:fe11:2/64 scope link \\       valid_lft forever preferred_lft forever
";

    #[test]
    fn test_parse_links() {
        assert_eq!(Iproute2::parse_links(LINKS), ["lo", "eth0"]);
    }

    #[test]
    fn test_parse_addresses() {
        assert_eq!(
            Iproute2::parse_addresses(ADDRS),
            ["172.17.0.2/16", "fe80::42:acff:fe11:2/64"]
        );
    }

    #[test]
    fn test_parse_gateway() {
        assert_eq!(
            Iproute2::parse_gateway("default via 172.17.0.1 dev eth0 \n"),
            Some("172.17.0.1".to_string())
        );
        assert_eq!(Iproute2::parse_gateway(""), None);
    }

    #[tokio::test]
    async fn test_hostname() {
        let fake = FakeRemote::new().respond("hostname", 0, "web01\n", "");
        let net = Iproute2::new(Arc::new(fake), false);
        assert_eq!(net.hostname().await.unwrap(), "web01");
    }

    #[tokio::test]
    async fn test_set_hostname_validates() {
        let fake = FakeRemote::new();
        let net = Iproute2::new(Arc::new(fake.clone()), true);
        assert!(net.set_hostname("bad name").await.is_err());
        assert!(fake.issued().is_empty());
    }
}

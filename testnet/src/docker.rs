//! [ContainerRuntime] backed by the `docker` command line client.

use crate::{ContainerId, ContainerRuntime, Error, NetworkId, RunSpec};
use std::{collections::BTreeMap, path::PathBuf, time::Duration};
use tokio::process::Command;
use tracing::debug;

/// Drives containers by invoking the `docker` binary.
#[derive(Clone, Debug)]
pub struct Docker {
    binary: PathBuf,
}

impl Default for Docker {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("docker"),
        }
    }
}

impl Docker {
    /// Use a specific `docker` (or compatible, e.g. `podman`) binary.
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }

    /// Run `docker <args>` and return its trimmed stdout.
    async fn execute(&self, args: Vec<String>) -> Result<String, Error> {
        debug!(args = %args.join(" "), "invoking docker");
        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .await
            .map_err(|e| Error::Runtime(format!("failed to invoke {:?}: {e}", self.binary)))?;
        if !output.status.success() {
            return Err(Error::Runtime(format!(
                "docker {} failed ({}): {}",
                args.first().map(String::as_str).unwrap_or_default(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Arguments of `docker run` for `spec`.
fn run_args(spec: &RunSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--detach".to_string(),
        "--name".to_string(),
        spec.name.clone(),
        "--hostname".to_string(),
        spec.hostname.clone(),
        "--network".to_string(),
        spec.network.clone(),
        "--restart".to_string(),
        "no".to_string(),
    ];
    for (key, value) in &spec.labels {
        args.push("--label".to_string());
        args.push(format!("{key}={value}"));
    }
    for mount in &spec.mounts {
        args.push("--volume".to_string());
        args.push(format!("{}:{}", mount.host.display(), mount.container));
    }
    for port in &spec.ports {
        args.push("--publish".to_string());
        args.push(port.clone());
    }
    args.push(format!("{}:{}", spec.repository, spec.tag));
    args.extend(spec.command.iter().cloned());
    args
}

/// Parse the first binding printed by `docker port` into a reachable `host:port`.
///
/// Wildcard bindings (`0.0.0.0`, `[::]`) are reachable via `localhost`.
fn parse_port_binding(output: &str) -> Option<String> {
    let line = output.lines().map(str::trim).find(|line| !line.is_empty())?;
    let (host, port) = line.rsplit_once(':')?;
    if port.parse::<u16>().is_err() {
        return None;
    }
    let host = match host {
        "" | "0.0.0.0" | "[::]" | "::" => "localhost",
        host => host,
    };
    Some(format!("{host}:{port}"))
}

/// Parse `{{.State.Running}} {{.State.ExitCode}}` into the exit code of an exited container.
fn parse_state(output: &str) -> Option<Option<i64>> {
    let (running, code) = output.trim().split_once(' ')?;
    match running {
        "true" => Some(None),
        "false" => code.parse().ok().map(Some),
        _ => None,
    }
}

impl ContainerRuntime for Docker {
    async fn run(&self, spec: RunSpec) -> Result<ContainerId, Error> {
        let id = self.execute(run_args(&spec)).await?;
        Ok(ContainerId(id))
    }

    async fn wait(&self, id: &ContainerId) -> Result<i64, Error> {
        let output = self.execute(vec!["wait".into(), id.0.clone()]).await?;
        output
            .parse()
            .map_err(|_| Error::Runtime(format!("unexpected exit code for {id}: {output}")))
    }

    async fn exit_code(&self, id: &ContainerId) -> Result<Option<i64>, Error> {
        let output = self
            .execute(vec![
                "inspect".into(),
                "--format".into(),
                "{{.State.Running}} {{.State.ExitCode}}".into(),
                id.0.clone(),
            ])
            .await?;
        parse_state(&output)
            .ok_or_else(|| Error::Runtime(format!("unexpected state for {id}: {output}")))
    }

    async fn logs(&self, id: &ContainerId) -> Result<String, Error> {
        let output = Command::new(&self.binary)
            .args(["logs", id.0.as_str()])
            .output()
            .await
            .map_err(|e| Error::Runtime(format!("failed to invoke {:?}: {e}", self.binary)))?;
        let mut logs = String::from_utf8_lossy(&output.stdout).to_string();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(logs)
    }

    async fn stop(&self, id: &ContainerId, timeout: Duration) -> Result<(), Error> {
        self.execute(vec![
            "stop".into(),
            "--time".into(),
            timeout.as_secs().to_string(),
            id.0.clone(),
        ])
        .await?;
        Ok(())
    }

    async fn remove(&self, id: &ContainerId, force: bool) -> Result<(), Error> {
        let mut args = vec!["rm".to_string()];
        if force {
            args.push("--force".into());
        }
        args.push(id.0.clone());
        self.execute(args).await?;
        Ok(())
    }

    async fn list_by_network(&self, network: &str) -> Result<Vec<ContainerId>, Error> {
        let output = self
            .execute(vec![
                "ps".into(),
                "--all".into(),
                "--quiet".into(),
                "--filter".into(),
                format!("network={network}"),
            ])
            .await?;
        Ok(output
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| ContainerId(line.trim().to_string()))
            .collect())
    }

    async fn create_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<NetworkId, Error> {
        let mut args = vec!["network".to_string(), "create".to_string()];
        for (key, value) in labels {
            args.push("--label".into());
            args.push(format!("{key}={value}"));
        }
        args.push(name.to_string());
        let id = self.execute(args).await?;
        Ok(NetworkId(id))
    }

    async fn find_networks(&self, name: &str) -> Result<Vec<NetworkId>, Error> {
        // The name filter matches substrings, so compare names exactly
        let output = self
            .execute(vec![
                "network".into(),
                "ls".into(),
                "--filter".into(),
                format!("name={name}"),
                "--format".into(),
                "{{.ID}} {{.Name}}".into(),
            ])
            .await?;
        Ok(output
            .lines()
            .filter_map(|line| line.trim().split_once(' '))
            .filter(|(_, network)| *network == name)
            .map(|(id, _)| NetworkId(id.to_string()))
            .collect())
    }

    async fn remove_network(&self, id: &NetworkId) -> Result<(), Error> {
        self.execute(vec!["network".into(), "rm".into(), id.0.clone()])
            .await?;
        Ok(())
    }

    async fn host_port(&self, id: &ContainerId, port: &str) -> Result<String, Error> {
        let output = self
            .execute(vec!["port".into(), id.0.clone(), port.to_string()])
            .await?;
        parse_port_binding(&output)
            .ok_or_else(|| Error::Runtime(format!("{id} does not publish {port}: {output}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Mount;

    #[test]
    fn test_run_args() {
        let spec = RunSpec {
            name: "node-ibc-test-1-0".into(),
            hostname: "node-ibc-test-1-0".into(),
            repository: "ghcr.io/strangelove-ventures/heighliner/gaia".into(),
            tag: "v5.0.7".into(),
            command: vec!["gaiad".into(), "start".into()],
            mounts: vec![Mount {
                host: PathBuf::from("/tmp/root/node-ibc-test-1-0"),
                container: "/home/gaiad".into(),
            }],
            ports: vec!["26657/tcp".into()],
            network: "ibc-test-1-network".into(),
            labels: BTreeMap::from([("commonware-testnet".into(), "ibc-test-1".into())]),
        };
        let args = run_args(&spec);
        assert_eq!(
            args.join(" "),
            "run --detach --name node-ibc-test-1-0 --hostname node-ibc-test-1-0 \
             --network ibc-test-1-network --restart no --label commonware-testnet=ibc-test-1 \
             --volume /tmp/root/node-ibc-test-1-0:/home/gaiad --publish 26657/tcp \
             ghcr.io/strangelove-ventures/heighliner/gaia:v5.0.7 gaiad start"
        );
    }

    #[test]
    fn test_parse_port_binding() {
        assert_eq!(
            parse_port_binding("0.0.0.0:49153\n[::]:49153\n"),
            Some("localhost:49153".into())
        );
        assert_eq!(
            parse_port_binding("127.0.0.1:32768"),
            Some("127.0.0.1:32768".into())
        );
        assert_eq!(parse_port_binding(""), None);
        assert_eq!(parse_port_binding("0.0.0.0:http"), None);
    }

    #[test]
    fn test_parse_state() {
        assert_eq!(parse_state("true 0"), Some(None));
        assert_eq!(parse_state("false 137\n"), Some(Some(137)));
        assert_eq!(parse_state("false"), None);
        assert_eq!(parse_state("paused 0"), None);
    }
}

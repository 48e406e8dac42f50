//! Render a Procfile as upstart jobs or systemd units

use anyhow::{Context, Result, bail};
use convergence::{EnvironmentMapping, ExportSpec, RenderedUnit, UnitFormat, UnitRenderer};
use std::fmt::Write as _;
use std::fs;

const BASE_PORT: u32 = 5000;

/// One `name: command` line of a Procfile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessType {
    pub name: String,
    pub command: String,
}

#[derive(Debug, Default)]
pub struct ProcfileRenderer;

impl UnitRenderer for ProcfileRenderer {
    fn render(&self, spec: &ExportSpec, env: &EnvironmentMapping) -> Result<Vec<RenderedUnit>> {
        let text = fs::read_to_string(&spec.procfile)
            .with_context(|| format!("Could not read {}", spec.procfile.display()))?;
        let processes = parse_procfile(&text)?;
        if processes.is_empty() {
            bail!("{} declares no processes", spec.procfile.display());
        }
        Ok(render_processes(spec, env, &processes))
    }
}

/// Parse Procfile text; blank lines and `#` comments are skipped
pub fn parse_procfile(text: &str) -> Result<Vec<ProcessType>> {
    let mut processes: Vec<ProcessType> = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((name, command)) = line.split_once(':') else {
            bail!("Procfile line {}: expected `name: command`", n + 1);
        };
        let name = name.trim();
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            bail!("Procfile line {}: invalid process name {name:?}", n + 1);
        }
        if processes.iter().any(|p| p.name == name) {
            bail!("Procfile line {}: duplicate process {name}", n + 1);
        }
        processes.push(ProcessType {
            name: name.to_string(),
            command: command.trim().to_string(),
        });
    }
    Ok(processes)
}

fn render_processes(
    spec: &ExportSpec,
    env: &EnvironmentMapping,
    processes: &[ProcessType],
) -> Vec<RenderedUnit> {
    let unit = |name: String, content: String| RenderedUnit {
        path: spec.target_dir.join(name),
        content,
    };

    let mut units = Vec::with_capacity(processes.len() + 1);
    match spec.format {
        UnitFormat::Upstart => {
            units.push(unit(format!("{}.conf", spec.app), upstart_master(&spec.app)));
            for (i, process) in processes.iter().enumerate() {
                let env = process_env(env, i);
                units.push(unit(
                    format!("{}-{}.conf", spec.app, process.name),
                    upstart_process(spec, process, &env),
                ));
            }
        }
        UnitFormat::Systemd => {
            let services: Vec<String> = processes
                .iter()
                .map(|p| format!("{}-{}.service", spec.app, p.name))
                .collect();
            units.push(unit(
                format!("{}.target", spec.app),
                systemd_target(&spec.app, &services),
            ));
            for (i, (process, service)) in processes.iter().zip(services).enumerate() {
                let env = process_env(env, i);
                units.push(unit(service, systemd_service(spec, process, &env)));
            }
        }
    }
    units
}

/// Each process type gets its own PORT unless one is set
fn process_env(env: &EnvironmentMapping, index: usize) -> EnvironmentMapping {
    let mut env = env.clone();
    if env.get("PORT").is_none() {
        let port = BASE_PORT + 100 * index as u32;
        env.insert("PORT", port.to_string());
    }
    env
}

fn upstart_master(app: &str) -> String {
    format!(
        "description \"{app}\"\n\
         \n\
         start on runlevel [2345]\n\
         stop on runlevel [!2345]\n"
    )
}

fn upstart_process(spec: &ExportSpec, process: &ProcessType, env: &EnvironmentMapping) -> String {
    let mut out = format!(
        "start on starting {app}\n\
         stop on stopping {app}\n\
         respawn\n\
         \n",
        app = spec.app
    );
    for (key, value) in env.iter() {
        let _ = writeln!(out, "env {key}='{}'", value.replace('\'', "'\\''"));
    }
    if let Some(user) = &spec.user {
        let _ = writeln!(out, "setuid {user}");
    }
    if let Some(cwd) = &spec.cwd {
        let _ = writeln!(out, "chdir {}", cwd.display());
    }
    let _ = writeln!(out, "\nexec {}", process.command);
    out
}

fn systemd_target(app: &str, services: &[String]) -> String {
    format!(
        "[Unit]\n\
         Description={app}\n\
         Wants={}\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        services.join(" ")
    )
}

fn systemd_service(spec: &ExportSpec, process: &ProcessType, env: &EnvironmentMapping) -> String {
    let mut out = format!(
        "[Unit]\n\
         PartOf={app}.target\n\
         \n\
         [Service]\n",
        app = spec.app
    );
    if let Some(user) = &spec.user {
        let _ = writeln!(out, "User={user}");
    }
    if let Some(cwd) = &spec.cwd {
        let _ = writeln!(out, "WorkingDirectory={}", cwd.display());
    }
    for (key, value) in env.iter() {
        let _ = writeln!(
            out,
            "Environment=\"{key}={}\"",
            value.replace('\\', "\\\\").replace('"', "\\\"")
        );
    }
    // ExecStart needs an absolute program
    let _ = writeln!(
        out,
        "ExecStart=/bin/sh -c '{}'",
        process.command.replace('\'', "'\\''")
    );
    out.push_str("Restart=always\n");
    out
}

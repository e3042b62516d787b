/*
 * SPDX-FileCopyrightText: 2026 Waxwing Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{anyhow, Result};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use waxwing_core::{
    actor::{activitypub_request, actor_request},
    builder, fanout, purge, queue, setup,
    store::valid_status,
    webfinger::webfinger_request,
    worker, Context, User,
};

fn usage() -> ExitCode {
    println!(
        "waxwing {} - a simple federated social server",
        env!("CARGO_PKG_VERSION")
    );
    println!();
    println!("Commands:");
    println!();
    println!("init [{{basedir}}]                  Initializes the database");
    println!("adduser {{basedir}} [{{uid}}]         Adds a new user");
    println!("httpd {{basedir}}                   Starts the HTTPD daemon");
    println!("purge {{basedir}}                   Purges old data");
    println!("webfinger {{basedir}} {{user}}        Queries about a @user@host or actor");
    println!("queue {{basedir}} {{uid}}             Processes a user queue");
    println!("follow {{basedir}} {{uid}} {{actor}}    Follows an actor");
    println!("announce {{basedir}} {{uid}} {{url}}    Announces (boosts) an url");
    println!("request {{basedir}} {{uid}} {{url}}     Requests an object");
    println!("actor {{basedir}} {{uid}} {{url}}       Requests an actor");
    println!("note {{basedir}} {{uid}} {{'text'}} [{{in_reply_to}}]  Sends a note to followers");

    ExitCode::FAILURE
}

fn init_logging(dbglevel: u32) {
    let default = match dbglevel {
        0 => "waxwing_core=info",
        1 => "waxwing_core=debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn dump_message(ctx: &Context, msg: &serde_json::Value) {
    if ctx.config.dbglevel > 0 {
        println!(
            "{}",
            serde_json::to_string_pretty(msg).unwrap_or_default()
        );
    }
}

fn editor_content() -> Result<String> {
    let path = std::env::temp_dir().join("waxwing-edit.txt");
    let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    let status = std::process::Command::new(&editor).arg(&path).status()?;
    if !status.success() {
        return Err(anyhow!("editor exited with an error"));
    }

    let content = std::fs::read_to_string(&path).map_err(|_| anyhow!("nothing to send"))?;
    let _ = std::fs::remove_file(&path);
    Ok(content)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut args = args.iter().map(String::as_str);

    let Some(cmd) = args.next() else {
        return usage();
    };

    if cmd == "init" {
        init_logging(0);
        return match setup::initdb(args.next()) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("ERROR: {e:#}");
                ExitCode::FAILURE
            }
        };
    }

    let Some(basedir) = args.next() else {
        return usage();
    };

    let ctx = match Context::open(basedir) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("ERROR: opening database at {basedir}: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(ctx.config.dbglevel);

    let rest: Vec<&str> = args.collect();
    match run(cmd, ctx, &rest).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("ERROR: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cmd: &str, ctx: Context, args: &[&str]) -> Result<ExitCode> {
    match cmd {
        "adduser" => {
            setup::adduser(&ctx, args.first().copied())?;
            return Ok(ExitCode::SUCCESS);
        }
        "httpd" => {
            waxwing_core::httpd::run(Arc::new(ctx)).await?;
            return Ok(ExitCode::SUCCESS);
        }
        "purge" => {
            purge::purge_all(&ctx);
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let Some(&user_arg) = args.first() else {
        return Ok(usage());
    };

    if cmd == "webfinger" {
        match webfinger_request(&ctx.http, user_arg).await {
            Ok((actor, uid)) => {
                println!("actor: {actor}");
                println!("uid: {uid}");
            }
            Err(e) => println!("error: {e:#}"),
        }
        return Ok(ExitCode::SUCCESS);
    }

    let user = User::open(&ctx, user_arg)?;

    if cmd == "queue" {
        worker::process_queue(&ctx, &user).await;
        return Ok(ExitCode::SUCCESS);
    }

    let Some(&url) = args.get(1) else {
        return Ok(usage());
    };

    match cmd {
        "follow" => {
            let msg = builder::msg_follow(&ctx, &user, url).await?;
            let actor = msg
                .get("object")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| anyhow!("follow message without object"))?
                .to_string();

            user.following_add(&actor, &msg);
            queue::enqueue_output(&ctx, &user, &msg, &actor, 0);
            dump_message(&ctx, &msg);
        }

        "announce" => {
            if let Some(msg) = builder::msg_admiration(&ctx, &user, url, "Announce").await {
                fanout::post(&ctx, &user, &msg);
                dump_message(&ctx, &msg);
            }
        }

        "request" => {
            let (status, data) = activitypub_request(&ctx, &user, url).await;
            println!("status: {status}");
            if valid_status(status) {
                if let Some(data) = data {
                    println!("{}", serde_json::to_string_pretty(&data)?);
                }
            }
        }

        "actor" => {
            let (status, data) = actor_request(&ctx, &user, url).await;
            println!("status: {status}");
            if valid_status(status) {
                if let Some(data) = data {
                    println!("{}", serde_json::to_string_pretty(&data)?);
                }
            }
        }

        "note" => {
            let content = if url == "-" {
                editor_content()?
            } else {
                url.to_string()
            };
            let in_reply_to = args.get(2).copied();

            let msg = builder::msg_note(&ctx, &user, &content, &[], in_reply_to, &[]).await;
            let c_msg = builder::msg_create(&user, &msg);
            dump_message(&ctx, &c_msg);

            fanout::post(&ctx, &user, &c_msg);

            if let Some(id) = msg.get("id").and_then(serde_json::Value::as_str) {
                user.cache(&ctx).timeline_add(id, &msg);
            }
        }

        _ => return Ok(usage()),
    }

    Ok(ExitCode::SUCCESS)
}

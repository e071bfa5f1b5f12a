//! Request dispatcher: single-threaded accept loop over the control
//! socket, routing one JSON request per connection to a handler.

use std::path::Path;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{error, info, instrument, warn};

use crate::account::now_epoch_secs;
use crate::context::SharedContext;
use crate::error::Error;
use crate::oauth::flows::{self, DeviceLookupOutcome, GenOutcome};
use crate::oauth::{metadata, registration};
use crate::oauth::http::revoke_token;
use crate::prompter::{AutoloadOutcome, ConfirmOutcome};
use crate::wire::AccountConfig;

/// Bind the control socket at `path` and run the accept loop forever.
///
/// Intentionally sequential: each connection is read, dispatched, and
/// answered to completion before the next `accept()` call. Handlers
/// freely mutate the registry without locks because only one ever
/// runs at a time.
pub async fn run(ctx: SharedContext, path: &Path) -> crate::Result<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let listener = UnixListener::bind(path)?;
    info!(path = %path.display(), "listening on control socket");

    loop {
        let (stream, _) = listener.accept().await?;
        if let Err(e) = handle_connection(&ctx, stream).await {
            warn!(error = %e, "connection handling failed");
        }
    }
}

async fn handle_connection(ctx: &SharedContext, stream: UnixStream) -> crate::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(());
    }

    let response = match serde_json::from_str::<Value>(&line) {
        Ok(request) => dispatch(ctx, request).await,
        Err(e) => error_envelope(&Error::BadRequest(format!("malformed json: {e}"))),
    };

    let mut out = serde_json::to_vec(&response)?;
    out.push(b'\n');
    write_half.write_all(&out).await?;
    Ok(())
}

fn status_for(err: &Error) -> &'static str {
    match err {
        Error::NotLoaded(_) => "notfound",
        Error::BadRequest(_) | Error::UnknownFlow(_) => "badrequest",
        _ => "failure",
    }
}

fn error_envelope(err: &Error) -> Value {
    json!({
        "status": status_for(err),
        "kind": err.kind(),
        "error": err.to_string(),
    })
}

fn str_field<'a>(req: &'a Value, key: &str) -> Option<&'a str> {
    req.get(key).and_then(Value::as_str)
}

fn u64_field(req: &Value, key: &str) -> Option<u64> {
    req.get(key).and_then(|v| {
        v.as_u64()
            .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
    })
}

#[instrument(skip(ctx, request), fields(request = %request.get("request").and_then(Value::as_str).unwrap_or("?")))]
async fn dispatch(ctx: &SharedContext, request: Value) -> Value {
    let Some(kind) = str_field(&request, "request") else {
        return error_envelope(&Error::BadRequest("missing request field".into()));
    };

    if ctx.lock.is_locked() && kind != "unlock" {
        return error_envelope(&Error::Locked);
    }

    let result = match kind {
        "gen" => handle_gen(ctx, &request).await,
        "add" => handle_add(ctx, &request).await,
        "remove" => handle_remove(ctx, &request),
        "delete" => handle_delete(ctx, &request).await,
        "remove_all" => handle_remove_all(ctx),
        "access_token" => handle_access_token(ctx, &request).await,
        "register" => handle_register(ctx, &request).await,
        "code_exchange" => handle_code_exchange(ctx, &request).await,
        "device_lookup" => handle_device_lookup(ctx, &request).await,
        "state_lookup" => handle_state_lookup(ctx, &request),
        "term_http" => handle_term_http(&request),
        "lock" => handle_lock(ctx, &request),
        "unlock" => handle_unlock(ctx, &request),
        "list" => handle_list(ctx),
        other => Err(Error::BadRequest(format!("unknown request kind: {other}"))),
    };

    match result {
        Ok(value) => value,
        Err(e) => {
            error!(error = %e, kind = %e.kind(), "handler failed");
            error_envelope(&e)
        }
    }
}

fn flow_list(request: &Value, key: &str) -> Vec<String> {
    request
        .get(key)
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

async fn handle_gen(ctx: &SharedContext, request: &Value) -> crate::Result<Value> {
    let config: AccountConfig = serde_json::from_value(
        request
            .get("account")
            .cloned()
            .ok_or_else(|| Error::BadRequest("missing account field".into()))?,
    )
    .map_err(|e| Error::BadRequest(format!("invalid account config: {e}")))?;

    // Unlike `register`, `gen` has no "not already loaded" precondition:
    // re-running it over an already-loaded shortname is how a fresh
    // code/device flow replaces any prior outstanding state for that
    // account (it simply overwrites the loaded record on success).
    let flows = flow_list(request, "flow");
    let mut account = config.into_account();
    let outcome = flows::run_flow_list(&ctx.http, &mut account, &ctx.secret_key, &flows).await?;

    match outcome {
        GenOutcome::Completed => {
            ctx.registry.upsert(account);
            Ok(json!({"status": "success"}))
        }
        GenOutcome::CodeUri { url, state } => {
            ctx.registry.upsert(account);
            Ok(json!({"status": "accepted", "code_uri": url, "state": state}))
        }
        GenOutcome::DeviceAuth {
            device_code: _,
            user_code,
            verification_uri,
            interval,
            expires_in,
        } => {
            ctx.registry.upsert(account);
            Ok(json!({
                "status": "accepted",
                "user_code": user_code,
                "verification_uri": verification_uri,
                "interval": interval.as_secs(),
                "expires_in": expires_in.as_secs(),
            }))
        }
    }
}

async fn handle_add(ctx: &SharedContext, request: &Value) -> crate::Result<Value> {
    let config: AccountConfig = serde_json::from_value(
        request
            .get("account")
            .cloned()
            .ok_or_else(|| Error::BadRequest("missing account field".into()))?,
    )
    .map_err(|e| Error::BadRequest(format!("invalid account config: {e}")))?;
    let shortname = config.shortname.clone();

    let timeout = u64_field(request, "timeout").unwrap_or(ctx.config.session.default_timeout_secs);
    let confirm = request
        .get("confirm")
        .and_then(Value::as_bool)
        .unwrap_or(ctx.config.session.confirm_by_default);
    let death = if timeout == 0 { 0 } else { now_epoch_secs() + timeout };

    if ctx.registry.contains(&shortname) {
        // Idempotent re-add: adjust death, re-encrypt sensitive buffers.
        ctx.registry.with_mut(&shortname, |account| {
            account.death = death;
            account.confirmation_required = confirm;
        })?;
        ctx.registry.with_mut(&shortname, |account| {
            account.hide_secrets(&ctx.secret_key)?;
            account.reveal_secrets(&ctx.secret_key)
        })??;
        return Ok(json!({"status": "success"}));
    }

    let mut account = config.into_account();
    account.death = death;
    account.confirmation_required = confirm;

    if let Err(e) = flows::run_refresh(&ctx.http, &mut account, &ctx.secret_key, None).await {
        // Endpoint-change retry: discovery may have yielded a different
        // token endpoint than the one already on the account; retry once.
        warn!(shortname = %shortname, error = %e, "initial add refresh failed, retrying once");
        account.endpoints = crate::account::Endpoints::default();
        flows::run_refresh(&ctx.http, &mut account, &ctx.secret_key, None).await?;
    }

    ctx.registry.insert_new(account)?;
    Ok(json!({"status": "success"}))
}

fn handle_remove(ctx: &SharedContext, request: &Value) -> crate::Result<Value> {
    let shortname = str_field(request, "account_name")
        .ok_or_else(|| Error::BadRequest("missing account_name field".into()))?;
    ctx.registry.remove(shortname)?;
    Ok(json!({"status": "success"}))
}

async fn handle_delete(ctx: &SharedContext, request: &Value) -> crate::Result<Value> {
    let config: AccountConfig = serde_json::from_value(
        request
            .get("account")
            .cloned()
            .ok_or_else(|| Error::BadRequest("missing account field".into()))?,
    )
    .map_err(|e| Error::BadRequest(format!("invalid account config: {e}")))?;
    let shortname = config.shortname.clone();

    let mut account = config.into_account();
    metadata::ensure_endpoints(&ctx.http, &mut account).await?;
    let revocation_endpoint = account
        .endpoints
        .revocation
        .clone()
        .ok_or_else(|| Error::RevokeFailed("no revocation endpoint".into()))?;
    let refresh_token = account.refresh_token.reveal_string(&ctx.secret_key)?;

    revoke_token(&ctx.http, &revocation_endpoint, &refresh_token, &account.client_id).await?;

    // Revocation succeeded: evict if loaded. Absent loaded record is fine.
    let _ = ctx.registry.remove(&shortname);
    Ok(json!({"status": "success"}))
}

fn handle_remove_all(ctx: &SharedContext) -> crate::Result<Value> {
    ctx.registry.remove_all();
    Ok(json!({"status": "success"}))
}

async fn handle_access_token(ctx: &SharedContext, request: &Value) -> crate::Result<Value> {
    let shortname = str_field(request, "account_name")
        .ok_or_else(|| Error::BadRequest("missing account_name field".into()))?
        .to_string();
    let min_valid_period = u64_field(request, "min_valid_period").unwrap_or(0);
    let scope = str_field(request, "scope").map(str::to_string);
    let application_hint = str_field(request, "application_hint").map(str::to_string);

    if !ctx.registry.contains(&shortname) {
        if !ctx.config.session.autoload_enabled {
            return Err(Error::NotLoaded(shortname));
        }
        match ctx
            .prompter
            .autoload(&shortname, application_hint.as_deref())
            .await?
        {
            AutoloadOutcome::Cancelled => return Err(Error::NotLoaded(shortname)),
            AutoloadOutcome::Config(config_json) => {
                let config: AccountConfig = serde_json::from_value(config_json)
                    .map_err(|e| Error::PrompterFailed(format!("invalid autoload config: {e}")))?;
                let mut account = config.into_account();
                flows::run_refresh(&ctx.http, &mut account, &ctx.secret_key, None).await?;
                ctx.registry.insert_new(account)?;
            }
        }
    }

    let needs_confirmation = ctx.registry.with(&shortname, |a| {
        a.confirmation_required || ctx.config.session.confirm_by_default
    })?;
    if needs_confirmation {
        match ctx
            .prompter
            .confirm(&shortname, application_hint.as_deref())
            .await?
        {
            ConfirmOutcome::Denied => {
                return Err(Error::PrompterFailed("confirmation denied".into()));
            }
            ConfirmOutcome::Allowed => {}
        }
    }

    let now = now_epoch_secs();
    let cached = ctx.registry.with(&shortname, |a| {
        let scope_matches = scope.is_none() || scope.as_deref() == a.access_token_scope.as_deref();
        if !a.access_token.is_empty()
            && a.access_token_expires_at >= now + min_valid_period
            && scope_matches
        {
            Some((
                a.access_token.reveal_string(&ctx.secret_key),
                a.issuer.clone(),
                a.access_token_expires_at,
            ))
        } else {
            None
        }
    })?;
    if let Some((token, issuer, expires_at)) = cached {
        let token = token?;
        return Ok(json!({
            "status": "success",
            "access_token": token,
            "issuer_url": issuer,
            "expires_at": expires_at,
        }));
    }

    let mut account = ctx.registry.remove(&shortname)?;
    let result = flows::run_refresh(&ctx.http, &mut account, &ctx.secret_key, scope.as_deref()).await;
    match result {
        Ok(()) => {
            let issuer = account.issuer.clone();
            let expires_at = account.access_token_expires_at;
            let response_token = account.access_token.reveal_string(&ctx.secret_key);

            if scope.is_some() {
                // Scope-override tokens are not cached back onto the
                // record; restore the prior default-scope cache before
                // reinserting.
                account.access_token = crate::secret::SecretBuffer::Empty;
                account.access_token_expires_at = 0;
                account.access_token_scope = None;
            }
            ctx.registry.upsert(account);

            Ok(json!({
                "status": "success",
                "access_token": response_token?,
                "issuer_url": issuer,
                "expires_at": expires_at,
            }))
        }
        Err(e) => {
            ctx.registry.upsert(account);
            Err(e)
        }
    }
}

async fn handle_register(ctx: &SharedContext, request: &Value) -> crate::Result<Value> {
    let config: AccountConfig = serde_json::from_value(
        request
            .get("account")
            .cloned()
            .ok_or_else(|| Error::BadRequest("missing account field".into()))?,
    )
    .map_err(|e| Error::BadRequest(format!("invalid account config: {e}")))?;
    let shortname = config.shortname.clone();

    if ctx.registry.contains(&shortname) {
        return Err(Error::AlreadyLoaded(shortname));
    }

    let flows = flow_list(request, "flows");
    let access_token = str_field(request, "access_token");

    let mut account = config.into_account();
    match registration::register(&ctx.http, &mut account, &flows, access_token).await? {
        registration::RegisterOutcome::SuccessClient(body) => {
            ctx.registry.insert_new(account)?;
            Ok(json!({"status": "success_client", "client": body}))
        }
        registration::RegisterOutcome::ErrorClient { error, body } => Ok(json!({
            "status": "error_client",
            "kind": error.kind(),
            "error": error.to_string(),
            "client": body,
        })),
    }
}

async fn handle_code_exchange(ctx: &SharedContext, request: &Value) -> crate::Result<Value> {
    let shortname = str_field(request, "account")
        .ok_or_else(|| Error::BadRequest("missing account field".into()))?
        .to_string();
    let code = str_field(request, "code")
        .ok_or_else(|| Error::BadRequest("missing code field".into()))?
        .to_string();
    let redirect_uri = str_field(request, "redirect_uri")
        .ok_or_else(|| Error::BadRequest("missing redirect_uri field".into()))?
        .to_string();
    let state = str_field(request, "state").map(str::to_string);
    let code_verifier = str_field(request, "code_verifier")
        .ok_or_else(|| Error::BadRequest("missing code_verifier field".into()))?
        .to_string();

    let mut account = ctx.registry.remove(&shortname)?;
    let state_matches = account
        .outstanding_code_flow
        .as_ref()
        .is_some_and(|f| state.as_deref().is_none_or(|s| s == f.state));
    if !state_matches {
        ctx.registry.upsert(account);
        return Err(Error::NotLoaded(shortname));
    }

    let result =
        flows::complete_code_exchange(&ctx.http, &mut account, &code, &redirect_uri, &code_verifier)
            .await;
    match result {
        Ok(()) => {
            let config = json!({
                "shortname": account.shortname,
                "issuer": account.issuer,
                "client_id": account.client_id,
            });
            ctx.registry.upsert(account);
            Ok(json!({"status": "success", "config": config}))
        }
        Err(e) => {
            ctx.registry.upsert(account);
            Err(e)
        }
    }
}

async fn handle_device_lookup(ctx: &SharedContext, request: &Value) -> crate::Result<Value> {
    let shortname = str_field(request, "account")
        .ok_or_else(|| Error::BadRequest("missing account field".into()))?
        .to_string();

    let mut account = ctx.registry.remove(&shortname)?;
    let result = flows::device_lookup(&ctx.http, &mut account).await;
    let response = match &result {
        Ok(DeviceLookupOutcome::Completed) => json!({"status": "success"}),
        Ok(DeviceLookupOutcome::Pending) => json!({"status": "accepted", "state": "pending"}),
        Ok(DeviceLookupOutcome::SlowDown { new_interval }) => json!({
            "status": "accepted",
            "state": "slow_down",
            "interval": new_interval.as_secs(),
        }),
        Err(_) => Value::Null,
    };
    match result {
        Ok(_) => {
            ctx.registry.upsert(account);
            Ok(response)
        }
        Err(e) => {
            ctx.registry.upsert(account);
            Err(e)
        }
    }
}

fn handle_state_lookup(ctx: &SharedContext, request: &Value) -> crate::Result<Value> {
    let state = str_field(request, "state")
        .ok_or_else(|| Error::BadRequest("missing state field".into()))?;
    match ctx.registry.find_by_outstanding_state(state) {
        Some(shortname) => Ok(json!({"status": "success", "account_name": shortname})),
        None => Err(Error::NotLoaded(format!("no account for state {state}"))),
    }
}

fn handle_term_http(_request: &Value) -> crate::Result<Value> {
    // The redirect-capture HTTP helper is an external collaborator;
    // this daemon holds no handle to terminate, so acknowledge only.
    Ok(json!({"status": "success"}))
}

fn handle_lock(ctx: &SharedContext, request: &Value) -> crate::Result<Value> {
    let password = str_field(request, "password")
        .ok_or_else(|| Error::BadRequest("missing password field".into()))?;
    ctx.lock.lock(password)?;
    ctx.registry.hide_all_secrets(&ctx.secret_key)?;
    Ok(json!({"status": "success"}))
}

fn handle_unlock(ctx: &SharedContext, request: &Value) -> crate::Result<Value> {
    let password = str_field(request, "password")
        .ok_or_else(|| Error::BadRequest("missing password field".into()))?;
    ctx.lock.unlock(password)?;
    ctx.registry.reveal_all_secrets(&ctx.secret_key)?;
    Ok(json!({"status": "success"}))
}

fn handle_list(ctx: &SharedContext) -> crate::Result<Value> {
    Ok(json!({"status": "success", "accounts": ctx.registry.shortnames()}))
}

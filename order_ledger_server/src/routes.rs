//----------------------------------------------   Webhook ingress  ----------------------------------------------------
use std::net::IpAddr;

use actix_web::{get, post, web, HttpRequest, HttpResponse};
use log::{debug, info, trace, warn};
use order_ledger_engine::{
    db_types::{Actor, ProviderTag},
    helpers::Deadline,
    traits::ProviderRegistry,
    OrderFlowApi,
    SqliteDatabase,
};
use serde_json::Value;

use crate::{config::ServerOptions, data_objects::JsonResponse};

#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(JsonResponse::success("ok"))
}

/// One URL path per provider, so provider identity is decided by the route
/// rather than sniffed out of headers. Source verification runs before any
/// payload parsing; unauthenticated or unparseable payloads are dropped,
/// never queued.
#[post("/webhook/{provider}")]
pub async fn gateway_webhook(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<Value>,
    api: web::Data<OrderFlowApi<SqliteDatabase>>,
    registry: web::Data<ProviderRegistry>,
    options: web::Data<ServerOptions>,
) -> HttpResponse {
    trace!("🛰️️ Received webhook request: {}", req.uri());
    let tag = match path.into_inner().parse::<ProviderTag>() {
        Ok(tag) => tag,
        Err(e) => {
            warn!("🛰️️ Webhook for unknown provider dropped. {e}");
            return HttpResponse::NotFound().finish();
        },
    };
    let Some(adapter) = registry.get(tag) else {
        warn!("🛰️️ Webhook for {tag} dropped: no adapter is registered");
        return HttpResponse::NotFound().finish();
    };
    let Some(peer_ip) = peer_ip(&req, &options) else {
        warn!("🛰️️ No peer address on {tag} webhook request, denying access");
        return HttpResponse::Forbidden().finish();
    };
    if !adapter.verify_webhook_authenticity(peer_ip) {
        warn!("🛰️️ {tag} webhook from unauthorized source {peer_ip} dropped");
        return HttpResponse::Forbidden().finish();
    }
    let Some(normalized) = adapter.normalize_webhook(&body.into_inner()) else {
        debug!("🛰️️ {tag} webhook payload carried nothing for the ledger");
        return HttpResponse::Ok().json(JsonResponse::failure("Payload ignored."));
    };
    // Webhook responses must always be in the 200 range, otherwise the
    // gateway will keep retrying.
    let actor = Actor::system(format!("{tag}-webhook"));
    let deadline = Deadline::within(options.request_timeout);
    let result = match api.handle_gateway_event(normalized, actor, deadline).await {
        Ok(outcome) => {
            info!("🛰️️ {tag} webhook processed for order {}", outcome.order().order_id);
            JsonResponse::success("Webhook processed.")
        },
        Err(e) => {
            warn!("🛰️️ Could not process {tag} webhook. {e}");
            JsonResponse::failure(e.to_string())
        },
    };
    HttpResponse::Ok().json(result)
}

/// Resolves the caller's IP, honouring the forwarding headers only when the
/// deployment says to trust them.
fn peer_ip(req: &HttpRequest, options: &ServerOptions) -> Option<IpAddr> {
    let forwarded = req
        .headers()
        .get("X-Forwarded-For")
        .and_then(|v| options.use_x_forwarded_for.then(|| v.to_str().ok()).flatten())
        .or_else(|| req.headers().get("Forwarded").and_then(|v| options.use_forwarded.then(|| v.to_str().ok()).flatten()));
    if let Some(header) = forwarded {
        let first = header.split(',').next().unwrap_or(header).trim();
        if let Ok(ip) = first.parse::<IpAddr>() {
            return Some(ip);
        }
    }
    req.peer_addr().map(|addr| addr.ip())
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use actix_web::test::TestRequest;

    use super::*;

    fn options(use_x_forwarded_for: bool) -> ServerOptions {
        ServerOptions { use_x_forwarded_for, use_forwarded: false, request_timeout: Duration::from_secs(30) }
    }

    #[test]
    fn forwarding_headers_are_ignored_unless_trusted() {
        let req = TestRequest::default()
            .insert_header(("X-Forwarded-For", "203.0.113.9, 10.0.0.1"))
            .peer_addr("192.0.2.1:443".parse().unwrap())
            .to_http_request();
        let trusted = peer_ip(&req, &options(true)).unwrap();
        assert_eq!(trusted, "203.0.113.9".parse::<IpAddr>().unwrap());
        let untrusted = peer_ip(&req, &options(false)).unwrap();
        assert_eq!(untrusted, "192.0.2.1".parse::<IpAddr>().unwrap());
    }
}

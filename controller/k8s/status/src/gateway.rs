use crate::{reconcile::condition, DesiredStatus};
use trellis_controller_collections::Collection;
use trellis_controller_core::{
    conditions::{self, errors_message, reasons},
    ir::{GatewayIr, ListenerIr, ListenerProtocol},
    GATEWAY_API_GROUP,
};
use trellis_controller_k8s_api::{
    gateway::gateways::{GatewayStatusListeners, GatewayStatusListenersSupportedKinds},
    GatewayStatus,
};

pub fn gateway_statuses(
    gateways: &Collection<GatewayIr>,
) -> Collection<DesiredStatus<GatewayStatus>> {
    gateways.derive_one("gateway-statuses", |_, gateway| {
        Some(DesiredStatus::new(&gateway.source, gateway_status(gateway)))
    })
}

pub fn gateway_status(gateway: &GatewayIr) -> GatewayStatus {
    let generation = gateway.generation;
    let accepted = match errors_message("Gateway", &gateway.errors) {
        None => condition(
            conditions::ACCEPTED,
            true,
            reasons::ACCEPTED,
            "",
            generation,
        ),
        Some(message) => condition(
            conditions::ACCEPTED,
            false,
            reasons::INVALID,
            message,
            generation,
        ),
    };

    // A gateway is programmed once at least one of its listeners can be
    // served.
    let programmed = gateway.errors.is_empty()
        && gateway.listeners.iter().any(|l| l.errors.is_empty());
    let programmed = if programmed {
        condition(
            conditions::PROGRAMMED,
            true,
            reasons::PROGRAMMED,
            "",
            generation,
        )
    } else {
        condition(
            conditions::PROGRAMMED,
            false,
            reasons::INVALID,
            "no listener can be programmed",
            generation,
        )
    };

    GatewayStatus {
        conditions: Some(vec![accepted, programmed]),
        listeners: Some(
            gateway
                .listeners
                .iter()
                .map(|l| listener_status(l, generation))
                .collect(),
        ),
        ..Default::default()
    }
}

fn listener_status(listener: &ListenerIr, generation: Option<i64>) -> GatewayStatusListeners {
    let message = errors_message("Listener", &listener.errors);
    let unsupported = listener.protocol == ListenerProtocol::Unsupported;

    let accepted = match &message {
        None => condition(
            conditions::ACCEPTED,
            true,
            reasons::ACCEPTED,
            "",
            generation,
        ),
        Some(message) => condition(
            conditions::ACCEPTED,
            false,
            if unsupported {
                reasons::UNSUPPORTED_PROTOCOL
            } else {
                reasons::INVALID
            },
            message.clone(),
            generation,
        ),
    };
    let resolved_refs = condition(
        conditions::RESOLVED_REFS,
        true,
        reasons::RESOLVED_REFS,
        "",
        generation,
    );
    let programmed = match message {
        None => condition(
            conditions::PROGRAMMED,
            true,
            reasons::PROGRAMMED,
            "",
            generation,
        ),
        Some(message) => condition(
            conditions::PROGRAMMED,
            false,
            reasons::INVALID,
            message,
            generation,
        ),
    };

    let supported_kinds = if unsupported {
        Vec::new()
    } else {
        vec![GatewayStatusListenersSupportedKinds {
            group: Some(GATEWAY_API_GROUP.to_string()),
            kind: "HTTPRoute".to_string(),
        }]
    };

    GatewayStatusListeners {
        name: listener.name.clone(),
        supported_kinds,
        attached_routes: i32::try_from(listener.routes.len()).unwrap_or(i32::MAX),
        conditions: vec![accepted, resolved_refs, programmed],
    }
}

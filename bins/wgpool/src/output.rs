//! Text output.

use wgpool::{AddedPeer, PeerDetails, PeerSummary, ReconcileOutcome};

fn or_dash(value: Option<String>) -> String {
    value.unwrap_or_else(|| "-".to_string())
}

pub fn print_added(added: &AddedPeer) {
    println!("Added {} at {}", added.name, added.address);
    println!("Client configuration: {}", added.export_path.display());
    if let Some(ref reason) = added.reconcile.fallback {
        println!("Interface reloaded: {}", reason);
    } else if added.reconcile.outcome == ReconcileOutcome::InterfaceDown {
        println!("Interface is down; the peer applies at next `wgpool up`");
    }
    println!();
    print!("{}", added.export);
}

pub fn print_peers(peers: &[PeerSummary]) {
    if peers.is_empty() {
        println!("No peers");
        return;
    }
    println!("{:<20} {:<16} PUBLIC KEY", "NAME", "ADDRESS");
    for peer in peers {
        println!(
            "{:<20} {:<16} {}",
            or_dash(peer.name.clone()),
            or_dash(peer.address.map(|a| a.to_string())),
            or_dash(peer.public_key.clone()),
        );
    }
}

pub fn print_details(details: &PeerDetails) {
    let peer = &details.summary;
    println!("peer: {}", or_dash(peer.name.clone()));
    println!("  address: {}", or_dash(peer.address.map(|a| a.to_string())));
    println!("  public key: {}", or_dash(peer.public_key.clone()));
    println!("  allowed ips: {}", peer.allowed_ips.join(", "));
    match details.export {
        Some(ref export) => {
            println!("  client configuration: {}", details.export_path.display());
            println!();
            print!("{}", export);
        }
        None => println!(
            "  client configuration: missing ({})",
            details.export_path.display()
        ),
    }
}

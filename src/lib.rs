/*!
bgpwatch is a toolkit for distributing and analyzing BGP routing-table
*views* at Internet scale.

Producers decode routing tables into per-collector bursts of peer and
prefix records and ship them to a central server; the server reassembles
each burst into a time-stamped [`View`], classifies it against configurable
full-feed thresholds, and publishes it to consumer clients whose advertised
interests match. Consumers decode published views and feed them through
pluggable analyses.

# Example

A producer building and shipping a one-peer table:

```no_run
use bgpwatch::{Client, ClientConfig, PeerState, Prefix};
use std::str::FromStr;

let mut client = Client::new(ClientConfig::default());
client.start().unwrap();

client.pfx_table_begin(1_700_000_000, "rrc00", 1).unwrap();
let peer = client
    .pfx_table_add_peer("10.0.0.1".parse().unwrap(), PeerState::Established, 65001)
    .unwrap();
client
    .pfx_table_add(peer, &Prefix::from_str("192.0.2.0/24").unwrap(), 64500)
    .unwrap();
client.pfx_table_end().unwrap();
client.stop();
```

A consumer receiving views:

```no_run
use bgpwatch::{Client, ClientConfig, RecvMode, View, ViewInterests};

let mut cfg = ClientConfig::default();
cfg.interests = ViewInterests::all();
let mut client = Client::new(cfg);
client.start().unwrap();

let mut view: View = View::new();
while let Ok(Some(interests)) = client.recv_view(RecvMode::Block, &mut view) {
    println!(
        "view time={} collector={} class={interests:?} peers={}",
        view.time(),
        view.collector(),
        view.peer_count()
    );
}
```

The building blocks are usable on their own: [`PatriciaTree`] for
longest-prefix matching and overlap analysis, [`IpCounter`] for unique
address-space accounting, [`PeerSigMap`] for peer interning, and the
[`View`] data model with its seekable iterator.
*/

pub mod client;
pub mod consumers;
pub mod error;
pub mod ipcounter;
pub mod models;
pub mod msg;
pub mod patricia;
pub mod server;
pub mod view;

pub use client::{Client, ClientConfig, RecvMode};
pub use error::{RetCode, WatcherError};
pub use ipcounter::IpCounter;
pub use models::{
    mask_addr, range_to_prefixes, Family, PeerId, PeerSigMap, PeerSignature, PeerState, Prefix,
    PrefixMatch,
};
pub use msg::ViewInterests;
pub use patricia::{NodeHandle, PatriciaTree, PfxOverlap, ResultSet, WalkControl};
pub use server::{
    FullFeedConfig, NoEvents, Server, ServerConfig, ServerEvents, ServerHandle,
};
pub use view::{View, ViewIter};

use chrono::{TimeZone, Utc};
use proptest::{arbitrary::any, prelude::*};

use crate::work::difficulty::CompactDifficulty;

use super::{merkle, Hash, Header, Height};

impl Arbitrary for Header {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        (
            any::<u32>(),
            any::<Hash>(),
            any::<merkle::Root>(),
            // all u32 times are valid wire timestamps
            any::<u32>(),
            any::<CompactDifficulty>(),
            any::<u32>(),
            any::<Height>(),
        )
            .prop_map(|(version, previous, root, time, bits, nonce, height)| {
                Header::new(
                    version,
                    previous,
                    root,
                    Utc.timestamp(time as i64, 0),
                    bits,
                    nonce,
                    height,
                )
            })
            .boxed()
    }

    type Strategy = BoxedStrategy<Header>;
}

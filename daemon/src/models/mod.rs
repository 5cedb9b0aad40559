macro_rules! import_models {
    ($x:ident) => {
        mod $x;
        pub use self::$x::*;
    };
}

import_models!(baseline);
import_models!(patch);
import_models!(patch_source);
import_models!(pending_job);
import_models!(pending_patch);
import_models!(repo);
import_models!(test_run);

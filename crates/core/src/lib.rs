pub mod shared {
    pub mod config;
    pub mod constants;
    pub mod frame;
    pub mod model_resolver;
    pub mod request;
}

pub mod identity {
    pub mod frame_fingerprint;
}

pub mod caching {
    pub mod domain {
        pub mod memory_probe;
        pub mod result_cache;
    }
    pub mod infrastructure;
}

pub mod admission {
    pub mod rate_limiter;
}

pub mod detection {
    pub mod domain {
        pub mod pose;
        pub mod pose_deduplicator;
        pub mod pose_detector;
        pub mod skeleton;
    }
    pub mod infrastructure;
}

pub mod selection {
    pub mod candidate_selector;
}

pub mod rendering {
    pub mod image_codec;
    pub mod skeleton_renderer;
}

pub mod pipeline {
    pub mod frame_processor;
    pub mod infrastructure;
    pub mod performance_recorder;
    pub mod pose_service;
    pub mod processor_pool;
}

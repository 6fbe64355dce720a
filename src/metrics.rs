use metrics::{describe_counter, Counter};

pub fn follows() -> Counter {
    metrics::counter!("follows")
}

pub fn unfollows() -> Counter {
    metrics::counter!("unfollows")
}

pub fn cascade_deleted_follows() -> Counter {
    metrics::counter!("cascade_deleted_follows")
}

pub fn describe_metrics() {
    describe_counter!("follows", "Number of follow records created");
    describe_counter!("unfollows", "Number of follow records removed by unfollows and syncs");
    describe_counter!(
        "cascade_deleted_follows",
        "Number of follow records removed because an endpoint entity was deleted"
    );
}
